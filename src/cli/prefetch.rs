use super::ui;
use crate::core::error::PipelineError;
use crate::core::gateway::ProviderGateway;
use crate::core::result::FetchResult;
use crate::core::router::ModuleRouter;
use comfy_table::{Cell, Color};
use std::sync::Arc;
use tracing::info;

type PrefetchOutcome = (String, Result<Arc<FetchResult>, PipelineError>);

/// Tabulates one prefetch outcome per module.
pub fn render_prefetch(results: &[PrefetchOutcome], cached: usize) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Module"),
        ui::header_cell("Status"),
        ui::header_cell("Rows"),
        ui::header_cell("Detail"),
    ]);

    let mut failures = 0;
    for (label, result) in results {
        let (status, rows, detail) = match result {
            Ok(fetched) if fetched.is_success() => (
                Cell::new("ok").fg(Color::Green),
                Cell::new(fetched.table.len()),
                Cell::new(format!("fetched {}", fetched.fetched_at.format("%H:%M:%S"))),
            ),
            Ok(fetched) => {
                failures += 1;
                (
                    Cell::new("failed").fg(Color::Red),
                    Cell::new("-"),
                    Cell::new(fetched.diagnostic().unwrap_or_default()),
                )
            }
            Err(e) => {
                failures += 1;
                (
                    Cell::new("rejected").fg(Color::Red),
                    Cell::new("-"),
                    Cell::new(e.to_string()),
                )
            }
        };
        table.add_row(vec![Cell::new(label), status, rows, detail]);
    }

    format!(
        "{}\n\n{}\n\n{} {}",
        ui::style_text("Prefetch", ui::StyleType::Title),
        table,
        ui::style_text("Cached entries:", ui::StyleType::Label),
        ui::style_text(
            &cached.to_string(),
            if failures == 0 {
                ui::StyleType::Value
            } else {
                ui::StyleType::Error
            }
        )
    )
}

/// Warms the router's cache for every module and reports each outcome.
pub async fn prefetch<G: ProviderGateway>(router: &ModuleRouter<G>) -> String {
    info!(modules = router.modules().len(), "Prefetching module data");

    let pb = ui::new_spinner("Fetching module data...");
    let results = router.prefetch().await;
    pb.finish_and_clear();

    render_prefetch(&results, router.cache().len().await)
}
