//! BITLEAF - Leaf Inspector
//! An interactive shell over a single nullable integer leaf, for watching
//! width upgrades, null re-seeding and compression happen.

use std::io::{self, BufRead, Write};

use bitleaf::{Allocator, ArrayIntNull, Config, SnapshotWriter};

fn parse_value(token: &str) -> Option<Option<i64>> {
    if token.eq_ignore_ascii_case("null") {
        return Some(None);
    }
    token.parse::<i64>().ok().map(Some)
}

fn show(value: Option<i64>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "null".to_string(),
    }
}

fn new_leaf(alloc: &Allocator) -> bitleaf::Result<ArrayIntNull> {
    let mut leaf = ArrayIntNull::new(alloc.clone());
    leaf.create()?;
    Ok(leaf)
}

fn main() {
    env_logger::init();

    println!();
    println!("  ╔═══════════════════════════════════════════╗");
    println!("  ║            BITLEAF Inspector              ║");
    println!("  ║     Packed & Flex-Compressed Leaves       ║");
    println!("  ╚═══════════════════════════════════════════╝");
    println!();
    println!("  Commands:");
    println!("    add <v|null>          - Append a value");
    println!("    insert <ndx> <v|null> - Insert a value at ndx");
    println!("    set <ndx> <v|null>    - Overwrite the value at ndx");
    println!("    get <ndx>             - Read the value at ndx");
    println!("    del <ndx>             - Erase the value at ndx");
    println!("    find <v|null>         - First index holding a value");
    println!("    compress              - Try packed or flex compression");
    println!("    decompress            - Expand a compressed leaf");
    println!("    dump                  - List every value");
    println!("    info                  - Show leaf and allocator statistics");
    println!("    save <path>           - Write a snapshot file");
    println!("    load <path>           - Attach a snapshot file");
    println!("    exit                  - Quit");
    println!();

    let alloc = match Allocator::new(Config::default()) {
        Ok(a) => a,
        Err(err) => {
            eprintln!("[ERROR] Failed to create allocator: {}", err);
            std::process::exit(1);
        }
    };
    let mut leaf = match new_leaf(&alloc) {
        Ok(l) => l,
        Err(err) => {
            eprintln!("[ERROR] Failed to create leaf: {}", err);
            std::process::exit(1);
        }
    };

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("bitleaf> ");
        if stdout.flush().is_err() {
            break;
        }

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => break, // EOF
            Ok(_) => {}
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.is_empty() {
            continue;
        }
        let ndx_arg = parts.get(1).and_then(|t| t.parse::<usize>().ok());

        match parts[0].to_lowercase().as_str() {
            "add" | "push" => {
                let Some(value) = parts.get(1).and_then(|t| parse_value(t)) else {
                    println!("  Usage: add <value|null>");
                    continue;
                };
                match leaf.add(value) {
                    Ok(()) => println!("  OK ({} values, width {})", leaf.size(), leaf.width()),
                    Err(e) => println!("  ERROR: {}", e),
                }
            }
            "insert" => {
                let (Some(ndx), Some(value)) = (ndx_arg, parts.get(2).and_then(|t| parse_value(t)))
                else {
                    println!("  Usage: insert <ndx> <value|null>");
                    continue;
                };
                if ndx > leaf.size() {
                    println!("  Index {} out of range (size {})", ndx, leaf.size());
                    continue;
                }
                match leaf.insert(ndx, value) {
                    Ok(()) => println!("  OK ({} values, width {})", leaf.size(), leaf.width()),
                    Err(e) => println!("  ERROR: {}", e),
                }
            }
            "set" => {
                let (Some(ndx), Some(value)) = (ndx_arg, parts.get(2).and_then(|t| parse_value(t)))
                else {
                    println!("  Usage: set <ndx> <value|null>");
                    continue;
                };
                if ndx >= leaf.size() {
                    println!("  Index {} out of range (size {})", ndx, leaf.size());
                    continue;
                }
                match leaf.set(ndx, value) {
                    Ok(()) => println!("  OK (width {})", leaf.width()),
                    Err(e) => println!("  ERROR: {}", e),
                }
            }
            "get" => match ndx_arg {
                Some(ndx) if ndx < leaf.size() => println!("  {}", show(leaf.get(ndx))),
                Some(ndx) => println!("  Index {} out of range (size {})", ndx, leaf.size()),
                None => println!("  Usage: get <ndx>"),
            },
            "del" | "delete" => match ndx_arg {
                Some(ndx) if ndx < leaf.size() => match leaf.erase(ndx) {
                    Ok(()) => println!("  OK (deleted)"),
                    Err(e) => println!("  ERROR: {}", e),
                },
                Some(ndx) => println!("  Index {} out of range (size {})", ndx, leaf.size()),
                None => println!("  Usage: del <ndx>"),
            },
            "find" => match parts.get(1).and_then(|t| parse_value(t)) {
                Some(value) => match leaf.find_first(value, 0, usize::MAX) {
                    Some(ndx) => println!("  {}", ndx),
                    None => println!("  (not found)"),
                },
                None => println!("  Usage: find <value|null>"),
            },
            "compress" => match leaf.try_compress() {
                Ok(true) => println!("  OK (compressed, {} bytes)", leaf.physical().byte_size()),
                Ok(false) => println!("  Not compressed (no gain)"),
                Err(e) => println!("  ERROR: {}", e),
            },
            "decompress" => match leaf.decompress() {
                Ok(()) => println!("  OK ({} bytes)", leaf.physical().byte_size()),
                Err(e) => println!("  ERROR: {}", e),
            },
            "dump" | "scan" => {
                if leaf.is_empty() {
                    println!("  (empty)");
                } else {
                    for (i, value) in leaf.to_vec().into_iter().enumerate() {
                        println!("  [{}] {}", i, show(value));
                    }
                    println!("  ({} values)", leaf.size());
                }
            }
            "info" | "stats" => {
                println!("  Values:      {}", leaf.size());
                println!("  Encoding:    {:?}", leaf.physical().encoding());
                println!("  Null value:  {}", leaf.null_value());
                println!("  Node size:   {} bytes", leaf.physical().byte_size());
                println!("  Arena size:  {} bytes", alloc.arena_size());
                println!("{}", alloc.metrics().report());
            }
            "save" => {
                let Some(path) = parts.get(1) else {
                    println!("  Usage: save <path>");
                    continue;
                };
                let mut writer = SnapshotWriter::append_to(&alloc);
                let top = match leaf.physical().write(&mut writer, true, true, true) {
                    Ok(r) => r,
                    Err(e) => {
                        println!("  ERROR: {}", e);
                        continue;
                    }
                };
                match writer.commit(path, top) {
                    Ok(bytes) => println!("  OK ({} bytes written)", bytes),
                    Err(e) => println!("  ERROR: {}", e),
                }
            }
            "load" => {
                let Some(path) = parts.get(1) else {
                    println!("  Usage: load <path>");
                    continue;
                };
                let top = match alloc.attach_file(path) {
                    Ok(r) => r,
                    Err(e) => {
                        println!("  ERROR: {}", e);
                        continue;
                    }
                };
                match ArrayIntNull::from_ref(alloc.clone(), top) {
                    Ok(l) => {
                        leaf = l;
                        println!("  OK ({} values)", leaf.size());
                    }
                    Err(e) => {
                        // The old leaf went away with the previous arena.
                        println!("  ERROR: {}", e);
                        alloc.detach();
                        match new_leaf(&alloc) {
                            Ok(l) => leaf = l,
                            Err(e) => {
                                eprintln!("[ERROR] Failed to recreate leaf: {}", e);
                                std::process::exit(1);
                            }
                        }
                    }
                }
            }
            "exit" | "quit" | "q" => {
                println!("  Shutting down BITLEAF...");
                break;
            }
            _ => {
                println!("  Unknown command: '{}'. Type 'exit' to quit.", parts[0]);
            }
        }
    }
}
