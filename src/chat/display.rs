use colored::*;
use comfy_table::{Attribute, Cell, CellAlignment, ContentArrangement, Table};

use crate::session::{ModelCatalog, Phase, SessionSnapshot};

fn header(text: &str) -> Cell {
    Cell::new(text)
        .fg(comfy_table::Color::Cyan)
        .add_attribute(Attribute::Bold)
}

/// Builds the catalog table, marking the selected and loaded models.
pub fn catalog_table(catalog: &ModelCatalog, session: Option<&SessionSnapshot>) -> Table {
    let mut table = Table::new();
    table
        .set_header(vec![
            header("#"),
            header("Id"),
            header("Name"),
            header("Size"),
            header("State"),
        ])
        .load_preset(comfy_table::presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);

    for (i, entry) in catalog.entries().iter().enumerate() {
        let state = match session {
            Some(s) if s.loaded_model.as_deref() == Some(entry.id.as_str()) => "loaded",
            Some(s) if s.selected_model.as_deref() == Some(entry.id.as_str()) => "selected",
            _ => "",
        };
        table.add_row(vec![
            Cell::new((i + 1).to_string())
                .fg(comfy_table::Color::White)
                .set_alignment(CellAlignment::Center),
            Cell::new(&entry.id).fg(comfy_table::Color::Yellow),
            Cell::new(&entry.name).fg(comfy_table::Color::Green),
            Cell::new(&entry.size)
                .fg(comfy_table::Color::Blue)
                .set_alignment(CellAlignment::Center),
            Cell::new(state)
                .fg(comfy_table::Color::Magenta)
                .set_alignment(CellAlignment::Center),
        ]);
    }
    table
}

/// Prints the model catalog.
pub fn display_catalog(catalog: &ModelCatalog, session: Option<&SessionSnapshot>) {
    if catalog.is_empty() {
        println!("{}", "No models configured in the catalog".yellow());
        return;
    }
    println!("\n{}", catalog_table(catalog, session));
    println!(
        "{}",
        format!("Total models: {}", catalog.entries().len()).bright_green()
    );
}

pub fn display_status(catalog: &ModelCatalog, session: &SessionSnapshot) {
    let phase = match session.phase {
        Phase::Idle => "idle".white(),
        Phase::Initializing => format!("initializing ({:.0}%)", session.progress * 100.0).yellow(),
        Phase::Ready => "ready".green(),
        Phase::Failed => "failed".red(),
    };
    println!("{} {}", "Session:".bold(), phase);
    if let Some(model) = &session.selected_model {
        println!("{} {}", "Selected:".bold(), catalog.display_name(model));
    }
    if let Some(model) = &session.loaded_model {
        println!("{} {}", "Loaded:".bold(), catalog.display_name(model));
    }
    if let Some(text) = &session.progress_text {
        if session.phase == Phase::Initializing {
            println!("{} {}", "Progress:".bold(), text);
        }
    }
    if let Some(error) = &session.last_error {
        println!("{} {}", "Last error:".bold(), error.red());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::CatalogEntry;

    fn catalog() -> ModelCatalog {
        ModelCatalog::new(vec![
            CatalogEntry {
                id: "llama-1b".into(),
                name: "Llama 1B".into(),
                size: "0.9GB".into(),
                file: None,
            },
            CatalogEntry {
                id: "qwen-0.5b".into(),
                name: "Qwen 0.5B".into(),
                size: "0.4GB".into(),
                file: None,
            },
        ])
    }

    #[test]
    fn test_catalog_table_marks_loaded_model() {
        let session = SessionSnapshot {
            phase: Phase::Ready,
            progress: 1.0,
            progress_text: None,
            selected_model: Some("qwen-0.5b".into()),
            loaded_model: Some("qwen-0.5b".into()),
            engine_loaded: true,
            last_error: None,
            epoch: 1,
        };
        let rendered = catalog_table(&catalog(), Some(&session)).to_string();
        assert!(rendered.contains("Llama 1B"));
        assert!(rendered.contains("Qwen 0.5B"));
        assert!(rendered.contains("loaded"));
        assert!(!rendered.contains("selected"));
    }
}
