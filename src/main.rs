// src/main.rs

use color_eyre::eyre::{Result, WrapErr};
use serde::Serialize;
use std::path::Path;
use tokio::io::AsyncReadExt;

mod app;
mod cli;
mod config;
mod core;
mod logging;

use app::App;
use cli::Command;
use config::Settings;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    logging::initialize_logging()?;

    let args = cli::parse();
    let settings = Settings::load()?;
    let app = App::new(&settings)?;

    let success = match args.command {
        Command::Launch { target, user_id } => {
            let handle = app.launch(&target, user_id);
            print_json(&app::launch_acknowledgement(&target))?;
            // The CLI stays alive until the detached launch reports back.
            let outcome = handle.outcome().await;
            print_json(&app::outcome_document(&outcome))?;
            outcome.is_success()
        }
        Command::Ingest { report, user_id } => {
            let raw = read_report(&report).await?;
            let ack = app.ingest_report(&raw, user_id).await;
            print_json(&ack)?;
            ack["success"] == true
        }
        Command::List { page, size } => {
            print_json(&app.list(page, size)?)?;
            true
        }
        Command::Show { id } => match app.show(id)? {
            Some(scan) => {
                print_json(&scan)?;
                true
            }
            None => {
                eprintln!("Scan not found with id: {id}");
                false
            }
        },
        Command::Delete { id } => {
            let removed = app.delete(id)?;
            print_json(&serde_json::json!({ "success": removed, "id": id }))?;
            removed
        }
    };

    if !success {
        std::process::exit(1);
    }
    Ok(())
}

async fn read_report(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut raw = String::new();
        tokio::io::stdin()
            .read_to_string(&mut raw)
            .await
            .wrap_err("failed to read report from stdin")?;
        return Ok(raw);
    }
    tokio::fs::read_to_string(path)
        .await
        .wrap_err_with(|| format!("failed to read report {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
