pub mod board;
pub mod card;
pub mod catalog;
pub mod list;

use placard::board::EntityRef;
use placard::pipeline::{FlushReport, MutationPipeline};

use crate::output::{OutputFormat, print_json};

/// Print the outcome of a flushed mutation on `entity`.
pub fn report_change(
    action: &str,
    entity: &EntityRef,
    pipeline: &MutationPipeline,
    report: &FlushReport,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let id = pipeline.resolve(entity.as_str()).unwrap_or(entity.as_str());
    let sequence = report
        .committed
        .last()
        .map_or(pipeline.confirmed().sequence(), |c| c.sequence);

    match format {
        OutputFormat::Human => println!("{action} {id}"),
        OutputFormat::Json => print_json(&serde_json::json!({
            "kind": entity.kind(),
            "id": id,
            "sequence": sequence,
        }))?,
    }
    Ok(())
}
