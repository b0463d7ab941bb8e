//! CLI front end for the CSME Huffman code object decoder
//!
//! This binary is the external collaborator around the library: it reads
//! files, drives [`csme_decoder::extract::ExtractionDriver`], and writes
//! decoded code objects to disk. The decode logic itself carries no
//! filesystem or CLI dependency.

use std::fs;
use std::io::Cursor;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::{info, warn};

use csme_decoder::extract::{ExtractedObject, ExtractionDriver};
use csme_decoder::fpt::FPT;
use csme_decoder::huffman::HuffmanCodebook;

#[derive(Subcommand)]
enum Command {
    /// Scan a file for every Firmware Partition Table occurrence
    Scan {
        /// File to read
        file_name: String,
    },
    /// List code partitions and code objects, flagging Huffman-compressed ones
    List {
        /// File to read
        file_name: String,
    },
    /// Decode every Huffman-compressed code object and write it to disk
    Extract {
        /// File to read
        file_name: String,
        /// Huffman code table (text format)
        #[clap(long, short)]
        table: String,
        /// Output directory
        #[clap(long, short, default_value = "out")]
        out: PathBuf,
    },
}

/// Decode Huffman-compressed code objects from Intel CSME firmware images
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
    #[clap(long, short, action)]
    verbose: bool,
}

fn main() {
    let env = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(env).init();

    let Cli { cmd, verbose } = Cli::parse();

    match cmd {
        Command::Scan { file_name } => {
            let data = match fs::read(&file_name) {
                Ok(d) => d,
                Err(e) => {
                    eprintln!("failed to read {file_name}: {e}");
                    std::process::exit(1);
                }
            };
            let mut begin = 0usize;
            let mut hits = 0;
            while let Some((offset, result)) = FPT::scan(&data, begin) {
                hits += 1;
                match result {
                    Ok(fpt) => {
                        println!("FPT @ 0x{offset:08x}: {} entries", fpt.entries.len());
                        if verbose {
                            println!("{}", fpt.header);
                        }
                    }
                    Err(e) => println!("FPT @ 0x{offset:08x}: parse error: {e:?}"),
                }
                begin = offset + 1;
            }
            if hits == 0 {
                println!("no FPT found in {file_name}");
            }
        }
        Command::List { file_name } => {
            let data = match fs::read(&file_name) {
                Ok(d) => d,
                Err(e) => {
                    eprintln!("failed to read {file_name}: {e}");
                    std::process::exit(1);
                }
            };
            let Some((offset, result)) = FPT::scan(&data, 0) else {
                println!("no FPT found in {file_name}");
                return;
            };
            let fpt = match result {
                Ok(fpt) => fpt,
                Err(e) => {
                    eprintln!("FPT @ 0x{offset:08x}: parse error: {e:?}");
                    std::process::exit(1);
                }
            };
            for part in fpt.code_entries() {
                println!("{part}");
                let cdt_offset = part.offset as usize;
                if cdt_offset >= data.len() {
                    warn!("{}: cdt offset out of range", part.name());
                    continue;
                }
                match csme_decoder::cpd::CodePartitionDirectory::parse(&data[cdt_offset..]) {
                    Ok(cdt) => {
                        for entry in &cdt.entries {
                            println!("    {entry}");
                        }
                    }
                    Err(e) => warn!("{}: failed to parse CPD: {e:?}", part.name()),
                }
            }
        }
        Command::Extract {
            file_name,
            table,
            out,
        } => {
            let data = match fs::read(&file_name) {
                Ok(d) => d,
                Err(e) => {
                    eprintln!("failed to read {file_name}: {e}");
                    std::process::exit(1);
                }
            };
            let table_text = match fs::read_to_string(&table) {
                Ok(t) => t,
                Err(e) => {
                    eprintln!("failed to read huffman table {table}: {e}");
                    std::process::exit(1);
                }
            };
            let codebook = match HuffmanCodebook::load_from_str(&table_text) {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("failed to parse huffman table: {e}");
                    std::process::exit(1);
                }
            };
            info!(
                "loaded {} huffman codes ({}..{} bits)",
                codebook.len(),
                codebook.min_code_bits(),
                codebook.max_code_bits()
            );

            let mut cursor = Cursor::new(data);
            let mut driver = ExtractionDriver::new(&mut cursor, &codebook);
            let results = match driver.extract_all() {
                Ok(r) => r,
                Err(e) => {
                    eprintln!("extraction failed: {e:?}");
                    std::process::exit(1);
                }
            };

            for object in results {
                match object {
                    ExtractedObject::Decoded {
                        partition,
                        name,
                        data,
                    } => {
                        let dir = out.join(&partition);
                        if let Err(e) = fs::create_dir_all(&dir) {
                            warn!("failed to create {}: {e}", dir.display());
                            continue;
                        }
                        let path = dir.join(format!("{name}.decoded"));
                        if let Err(e) = fs::write(&path, &data) {
                            warn!("failed to write {}: {e}", path.display());
                        } else {
                            info!("wrote {} ({} bytes)", path.display(), data.len());
                        }
                    }
                    ExtractedObject::AliasOf {
                        partition,
                        name,
                        alias_of_partition,
                        alias_of_name,
                    } => {
                        let dir = out.join(&partition);
                        if let Err(e) = fs::create_dir_all(&dir) {
                            warn!("failed to create {}: {e}", dir.display());
                            continue;
                        }
                        let link = dir.join(format!("{name}.decoded"));
                        let target = PathBuf::from("..")
                            .join(&alias_of_partition)
                            .join(format!("{alias_of_name}.decoded"));
                        #[cfg(unix)]
                        {
                            if let Err(e) = std::os::unix::fs::symlink(&target, &link) {
                                warn!("failed to symlink {}: {e}", link.display());
                            } else {
                                info!(
                                    "{partition}/{name} -> {alias_of_partition}/{alias_of_name} (symlink)"
                                );
                            }
                        }
                        #[cfg(not(unix))]
                        {
                            warn!(
                                "{partition}/{name} aliases {alias_of_partition}/{alias_of_name}; \
                                 symlinks unsupported on this platform, skipping"
                            );
                        }
                    }
                }
            }
        }
    }
}
