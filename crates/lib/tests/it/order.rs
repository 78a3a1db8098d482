//! Order key allocation tests

use placard::order::{KeyAllocator, OrderKey};

use crate::helpers::key;

/// Deterministic pseudo-random indices.
struct Lcg(u64);

impl Lcg {
    fn next_below(&mut self, bound: usize) -> usize {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        ((self.0 >> 33) as usize) % bound
    }
}

#[test]
fn random_inserts_keep_a_strict_order() {
    let allocator = KeyAllocator::default();
    let mut rng = Lcg(7);
    let mut keys: Vec<OrderKey> = Vec::new();

    for _ in 0..500 {
        let at = rng.next_below(keys.len() + 1);
        let lower = at.checked_sub(1).map(|i| &keys[i]);
        let upper = keys.get(at);
        let fresh = allocator.key_between(lower, upper).unwrap();
        if let Some(lo) = lower {
            assert!(lo < &fresh);
        }
        if let Some(hi) = upper {
            assert!(&fresh < hi);
        }
        keys.insert(at, fresh);
    }

    assert!(keys.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn keys_parse_back_unchanged() {
    let allocator = KeyAllocator::default();
    let mut lower = None;
    for _ in 0..20 {
        let next = allocator.key_between(lower.as_ref(), Some(&key("1"))).unwrap();
        assert_eq!(OrderKey::parse(next.as_str()).unwrap(), next);
        lower = Some(next);
    }
}

#[test]
fn exhausted_gap_recovers_after_rebalance() {
    let allocator = KeyAllocator::new(4);
    let mut items = vec![
        ("P", allocator.key_between(None, None).unwrap()),
        ("Q", OrderKey::parse("z").unwrap()),
    ];

    // Keep inserting right after P until the gap runs out
    let err = loop {
        match allocator.key_between(Some(&items[0].1), Some(&items[1].1)) {
            Ok(k) => items.insert(1, ("R", k)),
            Err(err) => break err,
        }
    };
    assert!(err.is_exhausted());

    let names: Vec<&str> = items.iter().map(|(name, _)| *name).collect();
    let respaced = allocator.rebalance(&names).unwrap();
    assert_eq!(
        respaced.iter().map(|(name, _)| *name).collect::<Vec<_>>(),
        names
    );
    assert!(respaced.windows(2).all(|w| w[0].1 < w[1].1));

    // The retry now has room
    let retried = allocator
        .key_between(Some(&respaced[0].1), Some(&respaced[1].1))
        .unwrap();
    assert!(respaced[0].1 < retried && retried < respaced[1].1);
}

#[test]
fn spread_fails_beyond_max_len() {
    let allocator = KeyAllocator::new(1);
    assert!(allocator.spread(1_000).unwrap_err().is_exhausted());
    assert_eq!(KeyAllocator::new(3).spread(1_000).unwrap().len(), 1_000);
}
