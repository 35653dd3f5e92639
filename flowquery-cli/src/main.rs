//! FlowQuery CLI — a thin wrapper over `flowquery_runtime::Runner`: read a
//! query from a file or stdin, run it, print the result rows as a
//! canonical JSON array.

use std::io::Read;
use std::path::PathBuf;

use clap::Parser;
use flowquery_core::Value;

fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}

#[derive(Parser)]
#[command(
    name = "flowquery",
    version,
    about = "Run a FlowQuery pipeline query and print its result rows as JSON"
)]
struct Cli {
    /// Path to a `.fq` source file; reads from stdin when omitted.
    #[arg()]
    file: Option<PathBuf>,
}

fn read_source(file: Option<PathBuf>) -> std::io::Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path),
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            Ok(buf)
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let source = match read_source(cli.file) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{} could not read source: {e}", red("error:"));
            std::process::exit(1);
        }
    };

    let mut runner = match flowquery_runtime::Runner::new(&source) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("{} {e}", red("error:"));
            std::process::exit(1);
        }
    };

    if let Err(e) = runner.run().await {
        eprintln!("{} {e}", red("error:"));
        std::process::exit(1);
    }

    let rows = Value::seq(
        runner
            .results()
            .iter()
            .map(|row| Value::map(row.clone()))
            .collect(),
    );
    println!("{}", rows.to_canonical_json());
}
