#![forbid(unsafe_code)]
//! mindfs command-line interface.
//!
//! Thin wrapper around the façade: image lifecycle (`create`, `format`),
//! one-shot command execution, an interactive shell (`run`), and a
//! multithreaded dispatch mode that fans `;`-separated commands out over
//! the task dispatcher.

use anyhow::{Context, Result, bail};
use clap::Parser;
use mindfs_block::DiskImage;
use mindfs_core::FileSystem;
use mindfs_dispatch::{TaskDispatcher, commands};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "mindfs",
    about = "mindfs — user-space simulated UNIX-style filesystem",
    after_help = "Examples:\n  \
        mindfs disk.img create 100\n  \
        mindfs disk.img format\n  \
        mindfs disk.img run\n  \
        mindfs disk.img ls /\n  \
        mindfs disk.img multithreaded --threads 4 touch /a.txt ; touch /b.txt"
)]
struct Cli {
    /// Path to the disk image file.
    image: PathBuf,

    /// Command to run against the image; omit (or `run`) for the shell.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match run() {
        Ok(code) => std::process::exit(code),
        Err(error) => {
            eprintln!("error: {error:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();

    match cli.command.first().map(String::as_str) {
        Some("create") => {
            let size_mb: u32 = cli
                .command
                .get(1)
                .context("create requires a size in megabytes")?
                .parse()
                .context("invalid size for create")?;
            DiskImage::create(&cli.image, size_mb)?;
            println!(
                "Disk created successfully: {} ({size_mb}MB)",
                cli.image.display()
            );
            Ok(0)
        }
        Some("format") => {
            // Raw format works on unmountable images; the root directory
            // is repaired on the next mount.
            let disk = DiskImage::open(&cli.image)?;
            disk.format()?;
            disk.close()?;
            println!("Disk formatted successfully");
            Ok(0)
        }
        Some("multithreaded") => run_multithreaded(&cli),
        Some("run") | None => run_shell(&cli.image),
        Some(_) => run_single(&cli),
    }
}

/// Mount, execute one command line, unmount, return its exit code.
fn run_single(cli: &Cli) -> Result<i32> {
    let fs = mount(&cli.image)?;

    // `info --json` is the one command with CLI-level output handling.
    let code = if cli.command.iter().map(String::as_str).eq(["info", "--json"]) {
        match fs.disk_info() {
            Ok(info) => {
                println!("{}", serde_json::to_string_pretty(&info)?);
                0
            }
            Err(e) => {
                eprintln!("{e}");
                1
            }
        }
    } else {
        commands::run_command_line(&fs, &cli.command.join(" "))
    };

    fs.unmount()?;
    Ok(code)
}

/// Interactive shell over a mounted image.
fn run_shell(image: &PathBuf) -> Result<i32> {
    let fs = mount(image)?;

    println!("Disk Simulation System");
    println!("Type 'help' for available commands");

    let stdin = std::io::stdin();
    let mut code = 0;
    loop {
        print!("mindfs> ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break; // EOF.
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            println!("Goodbye!");
            break;
        }
        code = commands::run_command_line(&fs, line);
    }

    fs.unmount()?;
    Ok(code)
}

/// Fan `;`-separated commands out over the dispatcher.
fn run_multithreaded(cli: &Cli) -> Result<i32> {
    let mut args = &cli.command[1..];
    let mut threads = 4usize;
    if args.first().map(String::as_str) == Some("--threads") {
        threads = args
            .get(1)
            .context("--threads requires a value")?
            .parse()
            .context("invalid thread count for multithreaded mode")?;
        args = &args[2..];
    }
    if args.is_empty() {
        bail!("multithreaded mode requires at least one command");
    }

    let fs = mount(&cli.image)?;
    let dispatcher = TaskDispatcher::new(Arc::clone(&fs), threads);

    let joined = args.join(" ");
    let lines: Vec<&str> = joined
        .split(';')
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    let mut receipts = Vec::with_capacity(lines.len());
    for line in &lines {
        receipts.push(dispatcher.execute_async(line)?);
    }

    let mut code = 0;
    for receipt in receipts {
        if receipt.wait()? != 0 {
            code = 1;
        }
    }

    drop(dispatcher);
    fs.unmount()?;
    Ok(code)
}

fn mount(image: &PathBuf) -> Result<Arc<FileSystem>> {
    let fs = Arc::new(FileSystem::new());
    fs.mount(image).with_context(|| {
        format!(
            "cannot mount disk file: {} (make sure it exists and is formatted)",
            image.display()
        )
    })?;
    Ok(fs)
}
