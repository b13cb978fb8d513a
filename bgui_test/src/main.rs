use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use bgui_lib::{Bgui, Node};
use clap::Parser;
use rayon::prelude::*;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// A .bgui file to dump, or a folder to check recursively.
    path: String,

    /// Print the parsed model as JSON instead of tables.
    #[arg(long)]
    json: bool,

    /// Print only the logical tree.
    #[arg(long)]
    tree: bool,
}

fn main() {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Warn)
        .init()
        .unwrap();

    let cli = Cli::parse();
    let path = Path::new(&cli.path);

    if path.is_dir() {
        check_all_bgui(path);
        return;
    }

    match Bgui::from_file(path) {
        Ok(bgui) => {
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&bgui).unwrap());
            } else if cli.tree {
                print_tree(&bgui);
            } else {
                print_summary(&bgui);
            }
        }
        Err(e) => {
            eprintln!("Error reading {path:?}: {e}");
            std::process::exit(2);
        }
    }
}

/// Parse every .bgui under `root` in parallel and report failures. Useful
/// for checking the heuristics against a whole game dump.
fn check_all_bgui(root: &Path) {
    let start = std::time::Instant::now();
    let parsed = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let warned = AtomicUsize::new(0);

    globwalk::GlobWalkerBuilder::from_patterns(root, &["*.bgui"])
        .build()
        .unwrap()
        .par_bridge()
        .for_each(|entry| {
            let path = entry.as_ref().unwrap().path();
            match Bgui::from_file(path) {
                Ok(bgui) => {
                    parsed.fetch_add(1, Ordering::Relaxed);
                    if !bgui.warnings.is_empty() {
                        warned.fetch_add(1, Ordering::Relaxed);
                        println!("{} warnings for {path:?}", bgui.warnings.len());
                    }
                }
                Err(e) => {
                    failed.fetch_add(1, Ordering::Relaxed);
                    println!("Error reading {path:?}: {e}");
                }
            }
        });

    println!(
        "Parsed {} files ({} with warnings, {} failed) in {:?}",
        parsed.load(Ordering::Relaxed),
        warned.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed()
    );
}

fn print_summary(bgui: &Bgui) {
    println!("Magic: {:02X?} ({:?})", bgui.header.magic, bgui.header.variant);
    if let Some(sprite) = &bgui.header.sprite {
        println!("Sprite: {}", sprite.path);
    }
    for page in &bgui.header.pages {
        println!("Page: {}", page.text);
    }

    println!("\nContainers ({} found):", bgui.containers.len());
    println!("ID    | Kind     | Offset     | Name");
    println!("{}", "-".repeat(60));
    for c in &bgui.containers {
        println!(
            "{:5} | {:8} | 0x{:08X} | {}",
            c.id,
            format!("{:?}", c.kind),
            c.marker_offset,
            if c.is_manifest() { "(manifest)" } else { c.name.as_str() }
        );
        if let Some(resource) = &c.resource {
            println!("      |          |            |   resource: {}", resource.path);
        }
    }

    println!("\nRegister entries ({}):", bgui.register.len());
    println!("ID    | Children | Offset");
    println!("{}", "-".repeat(40));
    for entry in &bgui.register {
        println!(
            "{:5} | {:8} | 0x{:08X}",
            entry.id, entry.child_count, entry.offset
        );
    }

    println!();
    print_tree(bgui);

    if !bgui.warnings.is_empty() {
        println!("\nWarnings ({}):", bgui.warnings.len());
        for warning in &bgui.warnings {
            println!("{:?} at 0x{:X}: {}", warning.kind, warning.offset, warning.message);
        }
    }
}

fn print_tree(bgui: &Bgui) {
    println!("Root (total entries: {})", bgui.register.len());
    for (i, root) in bgui.roots.iter().enumerate() {
        print_node(bgui, root, "", i + 1 == bgui.roots.len());
    }
}

fn print_node(bgui: &Bgui, node: &Node, prefix: &str, is_last: bool) {
    let connector = if is_last { "└── " } else { "├── " };
    let name = bgui
        .container_by_id(node.id)
        .map(|c| c.name.as_str())
        .unwrap_or("");
    let label = if name.is_empty() {
        format!("ID:{}", node.id)
    } else {
        format!("{name} (ID:{})", node.id)
    };
    println!("{prefix}{connector}{label} (children:{})", node.child_count);

    let child_prefix = format!("{prefix}{}", if is_last { "    " } else { "│   " });
    for (i, child) in node.children.iter().enumerate() {
        print_node(bgui, child, &child_prefix, i + 1 == node.children.len());
    }
}
