use crate::products::ProductGroup;
use crate::sites::{code_for_label, SiteDirectory};
use console::style;
use dialoguer::{Confirm, FuzzySelect, MultiSelect, Select};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

pub fn print_header() {
    println!();
    println!(
        "{}",
        style("╔═══════════════════════════════════════════════════╗").cyan()
    );
    println!(
        "{}",
        style("║        sanctclip - detection clip extractor       ║").cyan()
    );
    println!(
        "{}",
        style("╚═══════════════════════════════════════════════════╝").cyan()
    );
    println!();
}

/// Pick a site by its label, returning the lowercase code.
pub fn select_site(sites: &SiteDirectory) -> anyhow::Result<String> {
    let labels = sites.labels();
    if labels.is_empty() {
        anyhow::bail!("No sites known");
    }

    let selection = FuzzySelect::new()
        .with_prompt("Select site")
        .items(&labels)
        .default(0)
        .interact()?;

    Ok(code_for_label(&labels[selection]))
}

pub fn select_group(groups: &[ProductGroup]) -> anyhow::Result<ProductGroup> {
    if groups.is_empty() {
        anyhow::bail!("No product groups found");
    }

    let items: Vec<String> = groups
        .iter()
        .map(|g| {
            let exts: Vec<String> = g
                .ext_counts
                .iter()
                .map(|(ext, n)| format!("{}:{}", ext.trim_start_matches('.'), n))
                .collect();
            format!("{} [{}] {}", g.name, g.mode, exts.join(" "))
        })
        .collect();

    let selection = Select::new()
        .with_prompt("Select product set")
        .items(&items)
        .default(0)
        .interact()?;

    Ok(groups[selection].clone())
}

/// Let the user choose which recordings may be used as clip sources.
///
/// Everything starts checked; files already in `dest_dir` show their size.
pub fn select_recordings(names: &[String], dest_dir: &Path) -> anyhow::Result<HashSet<String>> {
    if names.is_empty() {
        return Ok(HashSet::new());
    }

    println!("\n{}", style("Select recordings to use:").bold());

    let items: Vec<String> = names
        .iter()
        .map(|name| match fs::metadata(dest_dir.join(name)) {
            Ok(meta) => format!("{} ({}, on disk)", name, format_size(meta.len())),
            Err(_) => name.clone(),
        })
        .collect();
    let defaults = vec![true; items.len()];

    let chosen = MultiSelect::new()
        .with_prompt("Space toggles, Enter confirms")
        .items(&items)
        .defaults(&defaults)
        .interact()?;

    let selected: HashSet<String> = chosen.into_iter().map(|i| names[i].clone()).collect();
    println!(
        "{} {} of {} recordings selected",
        style("✓").green(),
        selected.len(),
        names.len()
    );
    Ok(selected)
}

pub fn confirm_download(count: usize, dest_dir: &Path) -> anyhow::Result<bool> {
    if count == 0 {
        println!("{} Nothing to download", style("!").yellow());
        return Ok(false);
    }
    Ok(Confirm::new()
        .with_prompt(format!(
            "Download {} recordings to {}?",
            count,
            dest_dir.display()
        ))
        .default(true)
        .interact()?)
}

fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
