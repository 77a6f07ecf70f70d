// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! CLI argument parsing for ferrule.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// ferrule - load and run modules through an asynchronous module pipeline
#[derive(Parser, Debug)]
#[command(name = "ferrule")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Read loader options from a JSON file
    #[arg(short, long, global = true, env = "FERRULE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Base URL or directory modules are located under
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// Package map rule, `prefix=target` (repeatable)
    #[arg(long = "map", global = true, value_parser = parse_rule)]
    pub map: Vec<(String, String)>,

    /// Emit source maps for every compile
    #[arg(long, global = true)]
    pub source_maps: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Import a module and print its exports
    #[command(alias = "i")]
    Import(ImportArgs),

    /// Run a file as a script and print its completion value
    Script(ScriptArgs),

    /// Evaluate inline source
    #[command(alias = "e")]
    Eval(EvalArgs),
}

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Module specifier
    pub specifier: String,

    /// Canonical name of the requesting module
    #[arg(long)]
    pub referrer: Option<String>,
}

#[derive(Args, Debug)]
pub struct ScriptArgs {
    /// Script file
    pub file: PathBuf,
}

#[derive(Args, Debug)]
pub struct EvalArgs {
    /// Source text
    pub code: String,

    /// Evaluate as an anonymous module instead of a script
    #[arg(short, long)]
    pub module: bool,
}

fn parse_rule(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((prefix, target)) if !prefix.is_empty() && !target.is_empty() => {
            Ok((prefix.to_string(), target.to_string()))
        }
        _ => Err(format!("expected prefix=target, got '{}'", s)),
    }
}
