// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Ferrule - an asynchronous module loader
//!
//! This is the main entry point for the ferrule CLI.

mod cli;

use anyhow::Context;
use clap::Parser;
use owo_colors::OwoColorize;
use std::process::ExitCode;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Commands};
use ferrule_loader::{LoadOptions, Loader, LoaderOptions, Namespace, Value};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "ferrule=debug,ferrule_loader=debug"
    } else {
        "ferrule=warn,ferrule_loader=warn"
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .init();

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {:#}", "Error".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    let options = options(cli)?;
    debug!(
        base_url = %options.base_url,
        source_maps = options.source_maps,
        rules = options.map.len(),
        "Loader configured"
    );
    let loader = Loader::new(options)?;

    match &cli.command {
        Commands::Import(args) => {
            let mut request = LoadOptions::new();
            request.referrer_name = args.referrer.clone();
            let ns = loader.import(&args.specifier, request).await?;
            info!("Imported {} ({} exports)", args.specifier, ns.len());
            print_namespace(&ns);
        }
        Commands::Script(args) => {
            let source = tokio::fs::read_to_string(&args.file)
                .await
                .with_context(|| format!("cannot read {}", args.file.display()))?;
            let mut request = LoadOptions::new().named(args.file.display().to_string());
            request.address = Some(args.file.display().to_string());
            print_value(&loader.script(&source, request).await?);
        }
        Commands::Eval(args) if args.module => {
            let ns = loader.module(&args.code, LoadOptions::new()).await?;
            print_namespace(&ns);
        }
        Commands::Eval(args) => {
            print_value(&loader.script(&args.code, LoadOptions::new()).await?);
        }
    }
    Ok(())
}

/// Options file, then environment, then flags
fn options(cli: &Cli) -> anyhow::Result<LoaderOptions> {
    let mut options = match &cli.config {
        Some(path) => LoaderOptions::from_file(path)?,
        None => LoaderOptions::default(),
    };
    options.load_from_env()?;

    if let Some(base_url) = &cli.base_url {
        options.base_url = base_url.clone();
    }
    if cli.source_maps {
        options.source_maps = true;
    }
    for (prefix, target) in &cli.map {
        options.map.insert(prefix.clone(), target.clone());
    }
    options.validate()?;
    Ok(options)
}

fn print_value(value: &Value) {
    if !value.is_undefined() {
        println!("{}", value);
    }
}

fn print_namespace(ns: &Namespace) {
    for (name, value) in ns.iter() {
        println!("{} {}", format!("{}:", name).cyan(), value);
    }
}
