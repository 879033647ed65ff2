use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use colored::*;
use satbus_hk::table::{validate_copy_table, CopyTable, OutputGroupInfo, COPY_TABLE_ENTRIES};
use satbus_hk::{default_copy_table, MessageId};
use serde::Serialize;
use std::path::Path;

#[derive(Serialize)]
struct TableSummary {
    rules: usize,
    capacity: usize,
    packets: Vec<OutputGroupInfo>,
    subscriptions: Vec<MessageId>,
    pool_bytes: usize,
    valid: bool,
    error: Option<String>,
}

fn main() {
    let matches = App::new("hkctl")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Space Systems Engineering Team")
        .about("🛰️  Housekeeping copy table tool")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["json", "table"])
                .default_value("table")
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("check")
                .about("🔍 Validate a copy table and show the packets it builds")
                .arg(Arg::with_name("FILE").help("Copy table file").required(true))
                .arg(
                    Arg::with_name("binary")
                        .short("b")
                        .long("binary")
                        .help("Read the binary record format instead of JSON"),
                ),
        )
        .subcommand(SubCommand::with_name("default-table").about("📋 Print the sample copy table as JSON"))
        .subcommand(
            SubCommand::with_name("convert")
                .about("🔄 Convert a binary copy table image to JSON")
                .arg(Arg::with_name("FILE").help("Binary table image").required(true)),
        )
        .get_matches();

    let format = matches.value_of("format").unwrap_or("table");

    let result = match matches.subcommand() {
        ("check", Some(sub)) => handle_check(sub, format),
        ("default-table", Some(_)) => handle_default_table(),
        ("convert", Some(sub)) => handle_convert(sub),
        _ => Ok(()),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "❌".red(), e.to_string().bright_red());
        std::process::exit(1);
    }
}

fn load_table(path: &str, binary: bool) -> Result<CopyTable, Box<dyn std::error::Error>> {
    if binary {
        let image = std::fs::read(Path::new(path))?;
        Ok(CopyTable::decode(&image)?)
    } else {
        Ok(CopyTable::from_json_file(path)?)
    }
}

fn handle_check(matches: &ArgMatches<'_>, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let path = matches.value_of("FILE").unwrap_or_default();
    let table = load_table(path, matches.is_present("binary"))?;

    let packets = table.output_groups();
    let validation = validate_copy_table(&table);
    let summary = TableSummary {
        rules: table.defined_rules().count(),
        capacity: COPY_TABLE_ENTRIES,
        pool_bytes: packets.iter().map(|p| p.size).sum(),
        packets,
        subscriptions: table.distinct_input_ids(),
        valid: validation.is_ok(),
        error: validation.err().map(|e| e.to_string()),
    };

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&summary)?),
        _ => print_summary(path, &summary),
    }
    Ok(())
}

fn print_summary(path: &str, summary: &TableSummary) {
    println!("{} {}", "📋".bright_blue(), path.bright_blue().bold());
    println!(
        "{} {} of {} slots",
        "Rules:".bright_white(),
        summary.rules.to_string().bright_cyan(),
        summary.capacity
    );

    println!("\n{}", "Combined packets".bright_white().bold());
    for packet in &summary.packets {
        println!(
            "  {}  {:>5} bytes  {} rules",
            packet.output_id.to_string().bright_cyan(),
            packet.size,
            packet.rule_count
        );
    }
    println!("  {} {} bytes", "Pool needed:".dimmed(), summary.pool_bytes);

    println!("\n{}", "Subscriptions".bright_white().bold());
    for id in &summary.subscriptions {
        println!("  {}", id.to_string().bright_cyan());
    }

    println!();
    match &summary.error {
        None => println!("{} {}", "✅".green(), "Table is valid".bright_green()),
        Some(e) => println!("{} {}", "❌".red(), e.bright_red()),
    }
}

fn handle_default_table() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", default_copy_table().to_json()?);
    Ok(())
}

fn handle_convert(matches: &ArgMatches<'_>) -> Result<(), Box<dyn std::error::Error>> {
    let path = matches.value_of("FILE").unwrap_or_default();
    let table = load_table(path, true)?;
    println!("{}", table.to_json()?);
    Ok(())
}
