use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use flowscribe_core::{DescriptionSource, Interaction, PipelineOutcome};

pub fn interactions_table(interactions: &[Interaction]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("#").fg(Color::Cyan),
            Cell::new("Action").fg(Color::Cyan),
            Cell::new("Page").fg(Color::Cyan),
            Cell::new("Source").fg(Color::Cyan),
        ]);

    for interaction in interactions {
        let source = match interaction.source {
            DescriptionSource::Generated => Cell::new("generated").fg(Color::Green),
            DescriptionSource::Cached => Cell::new("cached").fg(Color::Blue),
            DescriptionSource::Fallback => Cell::new("fallback").fg(Color::Yellow),
        };
        let page = if interaction.page_title.is_empty() {
            "-"
        } else {
            interaction.page_title.as_str()
        };

        table.add_row(vec![
            Cell::new(interaction.step_number),
            Cell::new(&interaction.description),
            Cell::new(page),
            source,
        ]);
    }

    table
}

pub fn print_outcome(outcome: &PipelineOutcome) {
    println!();
    println!("{}", "Interactions".yellow().bold());
    if outcome.interactions.is_empty() {
        println!("  {}", "No interactions recorded".dimmed());
    } else {
        println!("{}", interactions_table(&outcome.interactions));
    }

    let fallbacks = outcome.fallback_count();
    if fallbacks > 0 {
        println!(
            "  {} {} step(s) used placeholder descriptions",
            "!".yellow(),
            fallbacks
        );
    }

    println!();
    println!(
        "{} {}",
        "Summary".yellow().bold(),
        if outcome.summary.cached {
            "(cached)".dimmed().to_string()
        } else {
            String::new()
        }
    );
    for line in outcome.summary.text.lines() {
        println!("  {}", line);
    }

    println!();
    println!(
        "{} {}",
        "✓".green().bold(),
        "Analysis complete!".green()
    );
    println!(
        "  {} Report: {}",
        "→".blue(),
        outcome.report_path.display()
    );
    match &outcome.image {
        Some(image) => println!(
            "  {} Image:  {}{}",
            "→".blue(),
            image.file_path.display(),
            if image.cached { " (cached)" } else { "" }
        ),
        None => println!("  {} Image:  {}", "→".blue(), "not generated".dimmed()),
    }
}
