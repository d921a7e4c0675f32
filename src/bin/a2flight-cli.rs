//! a2flight CLI - connectivity checks and ad-hoc queries against A2DB Flight servers

use std::path::PathBuf;
use std::time::Instant;

use a2flight_client::arrow::array_value_to_string;
use a2flight_client::logging::init_tracing;
use a2flight_client::{ClientConfig, Connection};
use anyhow::{Context, Result};
use arrow_array::{Array, RecordBatch};
use clap::{Parser, Subcommand};
use comfy_table::{
    modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, CellAlignment, Color,
    ContentArrangement, Table,
};

/// a2flight CLI - Arrow Flight client for A2DB servers
#[derive(Parser, Debug)]
#[command(name = "a2flight-cli")]
#[command(about = "Arrow Flight client for A2DB servers", long_about = None)]
struct Args {
    /// Env file with A2FLIGHT_* settings. Without it, A2FLIGHT_CLIENT_CONFIG_PATH
    /// and then the standard search path are tried.
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect, report the authentication mode and list server actions
    Ping,
    /// Run a query and print the result as a table
    Select {
        /// SQL query to execute
        #[arg(short, long)]
        query: String,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = ClientConfig::load_from(args.env_file.as_deref())
        .context("failed to load client configuration")?;
    if args.debug {
        config.log_level = "DEBUG".to_string();
    }
    init_tracing(&config);

    match args.command {
        Command::Ping => ping(config).await,
        Command::Select { query } => select(config, &query).await,
        Command::Config => {
            print_config(&config);
            Ok(())
        }
    }
}

async fn ping(config: ClientConfig) -> Result<()> {
    println!("Connecting to {}...", config.server_location());
    let mut conn = Connection::connect_new(config)
        .await
        .context("failed to connect to Arrow Flight server")?;

    let mode = if conn.is_authenticated() {
        "authenticated"
    } else {
        "no authentication required"
    };
    println!("Connected ({mode})");

    let actions = conn.list_actions().await?;
    if actions.is_empty() {
        println!("Server advertises no actions");
    } else {
        println!("Actions: {}", actions.join(", "));
    }
    conn.close().await;
    Ok(())
}

async fn select(config: ClientConfig, query: &str) -> Result<()> {
    let mut conn = Connection::connect_new(config)
        .await
        .context("failed to connect to Arrow Flight server")?;

    let start = Instant::now();
    let outcome = conn.select(query).await;
    conn.close().await;
    let batch = outcome?;
    let elapsed = start.elapsed();

    if batch.num_rows() == 0 {
        println!("(No rows returned)");
    } else {
        display_batch(&batch)?;
    }
    println!(
        "{} row{} in {:.3}s",
        batch.num_rows(),
        if batch.num_rows() == 1 { "" } else { "s" },
        elapsed.as_secs_f64()
    );
    Ok(())
}

fn display_batch(batch: &RecordBatch) -> Result<()> {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);

    let header: Vec<Cell> = batch
        .schema()
        .fields()
        .iter()
        .map(|field| {
            Cell::new(field.name())
                .fg(Color::Cyan)
                .set_alignment(CellAlignment::Center)
        })
        .collect();
    table.set_header(header);

    for row_idx in 0..batch.num_rows() {
        let mut row = Vec::with_capacity(batch.num_columns());
        for column in batch.columns() {
            row.push(Cell::new(format_cell_value(column.as_ref(), row_idx)?));
        }
        table.add_row(row);
    }

    println!("{table}");
    Ok(())
}

fn format_cell_value(column: &dyn Array, row_idx: usize) -> Result<String> {
    Ok(array_value_to_string(column, row_idx)?)
}

fn print_config(config: &ClientConfig) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Setting").fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);

    let rows = [
        ("client_name", config.client_name.clone()),
        ("api_key", config.display_api_key()),
        ("server_location", config.server_location()),
        ("environment", config.environment.clone()),
        ("service_name", config.service_name.clone()),
        ("log_level", config.log_level.clone()),
        ("log_format", config.log_format.clone()),
        ("max_message_size", config.max_message_size.to_string()),
        ("allowed_operations", config.allowed_operations.join(", ")),
    ];
    for (name, value) in rows {
        table.add_row(vec![Cell::new(name), Cell::new(value)]);
    }
    println!("{table}");

    for warning in config.check().warnings {
        println!("warning: {warning}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_file_comes_only_from_the_flag() {
        std::env::set_var("A2FLIGHT_CLIENT_CONFIG_PATH", "/nonexistent/a2flight.env");
        let args = Args::try_parse_from(["a2flight-cli", "config"]).unwrap();
        assert!(args.env_file.is_none());

        let args =
            Args::try_parse_from(["a2flight-cli", "--env-file", "local.env", "ping"]).unwrap();
        assert_eq!(args.env_file, Some(PathBuf::from("local.env")));
        assert!(matches!(args.command, Command::Ping));
    }
}
