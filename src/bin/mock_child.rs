// src/bin/mock_child.rs

//! Deterministic line-protocol child used by the integration tests.
//!
//! Reads one command per line on stdin and answers with zero or more
//! content lines followed by a `PASS` or `FAIL` terminal line:
//!
//! - `upcase <text>` / `downcase <text>` - echo the text re-cased
//! - `sleep <ms>` - sleep, then `slept <ms>`
//! - `flaky <rate>` - pass or fail depending on the seeded rng
//! - `version` - `v1.2.3`
//! - `stderr <text>` - write the text to stderr, then `PASS`
//! - `exit` - quit (unless `--ignore-exit`)
//!
//! Anything else is answered with a bare `FAIL`. The rng is seeded from
//! `--rngseed`, so a given seed always produces the same pass/fail pattern.

use std::hash::{Hash, Hasher};

use anyhow::Result;
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Debug, Parser)]
#[command(name = "mock-child", about = "Line-protocol child for batchpool tests.")]
struct Args {
    /// Seed string for the deterministic rng.
    #[arg(long, default_value = "hello")]
    rngseed: String,

    /// Probability that a data command answers FAIL instead of running.
    #[arg(long, default_value_t = 0.0)]
    fail_rate: f64,

    /// Ignore the exit command and SIGTERM; only SIGKILL works.
    #[arg(long)]
    ignore_exit: bool,
}

fn seed_from(s: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    s.hash(&mut hasher);
    hasher.finish()
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut rng = StdRng::seed_from_u64(seed_from(&args.rngseed));

    if args.ignore_exit {
        // Installing a handler replaces the default terminate disposition;
        // draining the stream keeps it installed.
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::spawn(async move { while sigterm.recv().await.is_some() {} });
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (cmd, rest) = match line.split_once(' ') {
            Some((cmd, rest)) => (cmd, rest),
            None => (line, ""),
        };

        match cmd {
            "version" => {
                println!("v1.2.3");
                println!("PASS");
            }
            "exit" => {
                if args.ignore_exit {
                    println!("ignoreExit is set");
                } else {
                    break;
                }
            }
            "upcase" | "downcase" | "sleep" | "flaky" | "stderr" => {
                if args.fail_rate > 0.0 && rng.gen::<f64>() < args.fail_rate {
                    println!("FAIL");
                    continue;
                }
                run_data_command(cmd, rest, &mut rng).await;
            }
            _ => println!("FAIL"),
        }
    }

    Ok(())
}

async fn run_data_command(cmd: &str, rest: &str, rng: &mut StdRng) {
    match cmd {
        "upcase" => {
            println!("{}", rest.to_uppercase());
            println!("PASS");
        }
        "downcase" => {
            println!("{}", rest.to_lowercase());
            println!("PASS");
        }
        "sleep" => match rest.trim().parse::<u64>() {
            Ok(ms) => {
                tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
                println!("slept {ms}");
                println!("PASS");
            }
            Err(_) => println!("FAIL"),
        },
        "flaky" => match rest.trim().parse::<f64>() {
            Ok(rate) => {
                let r: f64 = rng.gen();
                let marker = if r >= rate { "PASS" } else { "FAIL" };
                println!("flaky response ({marker}, r: {r:.2}, flakeRate: {rate:.2})");
                println!("{marker}");
            }
            Err(_) => println!("FAIL"),
        },
        "stderr" => {
            eprintln!("{rest}");
            println!("PASS");
        }
        _ => unreachable!("dispatched above"),
    }
}
