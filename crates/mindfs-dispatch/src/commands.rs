//! The command surface shared by the dispatcher and the interactive shell.
//!
//! Maps one command line (`ls /docs`, `echo hi > /a.txt`, …) onto façade
//! calls, printing results to stdout and the failure to stderr. Exit codes
//! are binary: 0 on success, 1 on any failure.

use crate::classify;
use mindfs_core::FileSystem;
use mindfs_error::{FsError, Result};
use mindfs_stress::{StressConfig, StressHarness};
use mindfs_types::{OPEN_CREATE, OPEN_READ, OPEN_WRITE, PERM_READ, PERM_WRITE};
use std::io::Write;
use std::sync::Arc;
use tracing::debug;

/// Run one command line against the façade, reporting errors on stderr.
/// Returns the process-style exit code.
pub fn run_command_line(fs: &Arc<FileSystem>, line: &str) -> i32 {
    match run_command(fs, line) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{e}");
            e.exit_code()
        }
    }
}

/// Run one command line against the façade.
pub fn run_command(fs: &Arc<FileSystem>, line: &str) -> Result<()> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some((&name, args)) = tokens.split_first() else {
        return Err(FsError::InvalidSyntax("empty command".to_owned()));
    };

    debug!(
        target: "mindfs::dispatch",
        event = "command",
        name,
        mode = ?classify(line)
    );

    match name {
        "help" => {
            print_help();
            Ok(())
        }
        "info" => {
            print!("{}", fs.disk_info()?);
            Ok(())
        }
        "format" => {
            fs.format()?;
            println!("Disk formatted successfully");
            Ok(())
        }
        "ls" => cmd_ls(fs, args.first().copied().unwrap_or("/")),
        "mkdir" => {
            let path = single_path(name, args)?;
            fs.create_directory(path)?;
            println!("Directory created: {path}");
            Ok(())
        }
        "touch" => {
            let path = single_path(name, args)?;
            fs.create_file(path, PERM_READ | PERM_WRITE)?;
            println!("File created: {path}");
            Ok(())
        }
        "rm" => {
            let path = single_path(name, args)?;
            match fs.delete_file(path) {
                Ok(()) => {}
                Err(FsError::IsADirectory(_)) => fs.remove_directory(path)?,
                Err(e) => return Err(e),
            }
            println!("Removed: {path}");
            Ok(())
        }
        "cat" => cmd_cat(fs, single_path(name, args)?),
        "echo" => cmd_echo(fs, args),
        "copy" | "cp" => {
            let [src, dst] = args else {
                return Err(FsError::InvalidArgument(
                    "copy requires exactly two arguments: source and destination".to_owned(),
                ));
            };
            let bytes = fs.copy_file(src, dst)?;
            println!("File copied from {src} to {dst} ({bytes} bytes)");
            Ok(())
        }
        "stress" => {
            let args: Vec<String> = args.iter().map(|s| (*s).to_owned()).collect();
            let config = StressConfig::parse_args(&args)?;
            if StressHarness::new(Arc::clone(fs)).run(&config) {
                Ok(())
            } else {
                Err(FsError::InvalidArgument(
                    "stress test reported errors".to_owned(),
                ))
            }
        }
        other => Err(FsError::UnknownCommand(other.to_owned())),
    }
}

fn single_path<'a>(command: &str, args: &[&'a str]) -> Result<&'a str> {
    match args {
        &[path] => Ok(path),
        _ => Err(FsError::InvalidArgument(format!(
            "{command} requires exactly one path"
        ))),
    }
}

fn cmd_ls(fs: &Arc<FileSystem>, path: &str) -> Result<()> {
    let entries = fs.list_directory(path)?;

    let mut rendered = Vec::with_capacity(entries.len());
    for entry in &entries {
        let is_dir = entry.name == "."
            || entry.name == ".."
            || fs.is_directory(&join_child(path, &entry.name));
        if is_dir {
            rendered.push(format!("{}/", entry.name));
        } else {
            rendered.push(entry.name.clone());
        }
    }
    println!("{}", rendered.join("\t"));
    Ok(())
}

fn cmd_cat(fs: &Arc<FileSystem>, path: &str) -> Result<()> {
    if !fs.file_exists(path) {
        return Err(FsError::FileNotFound(path.to_owned()));
    }

    let fd = fs.open_file(path, OPEN_READ)?;
    let mut content = Vec::new();
    let mut chunk = [0u8; 1024];
    let result = loop {
        match fs.read_file(fd, &mut chunk) {
            Ok(0) => break Ok(()),
            Ok(n) => content.extend_from_slice(&chunk[..n]),
            Err(e) => break Err(e),
        }
    };
    let _ = fs.close_file(fd);
    result?;

    let mut stdout = std::io::stdout().lock();
    let _ = stdout.write_all(&content);
    let _ = stdout.write_all(b"\n");
    Ok(())
}

/// `echo <text...> > <path>` — joins the text words and writes them to the
/// target, creating it when missing.
fn cmd_echo(fs: &Arc<FileSystem>, args: &[&str]) -> Result<()> {
    let [text @ .., redirect, path] = args else {
        return Err(FsError::InvalidSyntax(
            "echo requires: echo <text...> > <path>".to_owned(),
        ));
    };
    if *redirect != ">" {
        return Err(FsError::InvalidSyntax(
            "echo requires a '>' before the target path".to_owned(),
        ));
    }

    let text = text.join(" ");
    let fd = fs.open_file(path, OPEN_WRITE | OPEN_CREATE)?;
    let result = fs.write_file(fd, text.as_bytes());
    let _ = fs.close_file(fd);

    if result? != text.len() {
        return Err(FsError::InvalidArgument(format!(
            "failed to write to file: {path}"
        )));
    }
    println!("Written to file: {path}");
    Ok(())
}

fn join_child(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

fn print_help() {
    println!("Available commands:");
    println!("  info                     - Show disk information");
    println!("  format                   - Format the mounted disk");
    println!("  ls [path]                - List directory contents");
    println!("  mkdir <path>             - Create a directory");
    println!("  touch <path>             - Create an empty file");
    println!("  rm <path>                - Remove a file or empty directory");
    println!("  cat <path>               - Print file contents");
    println!("  echo <text...> > <path>  - Write text to a file");
    println!("  copy <src> <dst>         - Copy a file");
    println!("  stress [options]         - Run the storage stress test");
    println!("  help                     - Show this help");
    println!("  exit | quit              - Leave the shell");
}
