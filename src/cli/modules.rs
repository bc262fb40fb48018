use super::ui;
use crate::core::gateway::SYMBOL_PARAM;
use crate::core::router::ModuleDescriptor;
use comfy_table::Cell;

/// Renders the module catalogue as a table, in sidebar order.
pub fn render_modules(modules: &[ModuleDescriptor]) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Module"),
        ui::header_cell("Description"),
        ui::header_cell("Source"),
        ui::header_cell("Default Symbol"),
        ui::header_cell("Chart"),
    ]);

    for module in modules {
        let mut chart = module.chart.to_string();
        if module.show_volume {
            chart.push_str(" + volume");
        }
        for overlay in &module.overlays {
            chart.push_str(&format!(" + {overlay}"));
        }
        if module.signals {
            chart.push_str(" + signals");
        }
        if !module.compare.is_empty() {
            chart.push_str(&format!(" | vs. {}", module.compare.join(", ")));
        }

        table.add_row(vec![
            Cell::new(&module.label),
            Cell::new(&module.description),
            Cell::new(format!(
                "{} / {}",
                module.query.provider(),
                module.query.function()
            )),
            Cell::new(module.query.param(SYMBOL_PARAM).unwrap_or("-")),
            Cell::new(chart),
        ]);
    }

    format!(
        "{}\n\n{}",
        ui::style_text("Modules", ui::StyleType::Title),
        table
    )
}

pub fn run(modules: &[ModuleDescriptor]) {
    println!("{}", render_modules(modules));
}
