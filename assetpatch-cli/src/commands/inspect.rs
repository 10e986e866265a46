//! Inspect command - decode a manifest file and summarize it.

use std::collections::BTreeMap;
use std::fs;

use assetpatch::config::format_size;
use assetpatch::manifest::deserialize;

use crate::error::CliError;

/// Run the inspect command.
pub fn run(path: &str, json: bool) -> Result<(), CliError> {
    let data = fs::read(path).map_err(|e| CliError::Manifest(format!("{}: {}", path, e)))?;
    let manifest = deserialize(&data)?;

    if json {
        let text = serde_json::to_string_pretty(&manifest)
            .map_err(|e| CliError::Manifest(e.to_string()))?;
        println!("{}", text);
        return Ok(());
    }

    println!("Package:      {}", manifest.package_name);
    println!("Version:      {}", manifest.package_version);
    println!("Format:       {}", manifest.file_version);
    println!("Addressable:  {}", manifest.enable_addressable);
    println!("Name style:   {}", manifest.output_name_style);
    println!("Assets:       {}", manifest.asset_list.len());
    println!("Bundles:      {}", manifest.bundle_list.len());
    println!("Total size:   {}", format_size(manifest.total_bundle_size()));

    let mut by_tag: BTreeMap<&str, (usize, u64)> = BTreeMap::new();
    for bundle in &manifest.bundle_list {
        if bundle.tags.is_empty() {
            let entry = by_tag.entry("(untagged)").or_default();
            entry.0 += 1;
            entry.1 += bundle.file_size;
        }
        for tag in &bundle.tags {
            let entry = by_tag.entry(tag.as_str()).or_default();
            entry.0 += 1;
            entry.1 += bundle.file_size;
        }
    }

    if !by_tag.is_empty() {
        println!();
        println!("Tags:");
        for (tag, (count, bytes)) in by_tag {
            println!("  {:<20} {:>5} bundles  {}", tag, count, format_size(bytes));
        }
    }

    Ok(())
}
