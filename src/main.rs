//! Main entry point for the zipkit CLI application.
//!
//! Lists, tests, extracts and repacks ZIP archives read from the local
//! filesystem or from HTTP URLs.

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use zipkit::{
    Archive, ArchiveBuilder, ChannelInput, ChannelOutput, Cli, EntryRef, FileChannelInput,
    FileChannelOutput, HttpRangeChannel,
};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    if cli.is_http_url() {
        let channel = Arc::new(
            HttpRangeChannel::new(cli.file.clone())
                .with_context(|| format!("cannot open {}", cli.file))?,
        );
        let transferred_before = channel.transferred_bytes();

        process_zip(Box::new(channel.clone()), &cli)?;

        if !cli.is_quiet() {
            let fetched = channel.transferred_bytes() - transferred_before;
            eprintln!("\n{} fetched from {}", format_size(fetched), cli.file);
        }
    } else {
        let channel = FileChannelInput::with_offset_bias(Path::new(&cli.file), cli.offset_bias)
            .with_context(|| format!("cannot open {}", cli.file))?;
        process_zip(Box::new(channel), &cli)?;
    }

    Ok(())
}

/// Process a ZIP archive based on CLI options.
///
/// - List mode (`-l` or `-v`): display archive contents
/// - Test mode (`-t`): decompress everything and check CRCs
/// - Repack mode (`--repack`): copy the selected entries into a new archive
/// - Otherwise extract the selected entries
fn process_zip(channel: Box<dyn ChannelInput>, cli: &Cli) -> Result<()> {
    let archive = Archive::open(channel).with_context(|| format!("cannot read {}", cli.file))?;

    if cli.list || cli.verbose {
        list_files(&archive, cli.verbose);
        return Ok(());
    }

    if cli.test {
        return test_archive(&archive, cli);
    }

    if let Some(out) = &cli.repack {
        // Directories only come along when copying everything.
        let selected = select_entries(&archive, cli, cli.files.is_empty());
        return repack(&selected, archive.comment(), Path::new(out), cli);
    }

    let selected = select_entries(&archive, cli, false);
    let multiple_files = cli.pipe && selected.len() > 1;
    for entry in &selected {
        extract_file(entry, cli, multiple_files)?;
    }

    Ok(())
}

/// Apply the positional file filters and the `-x` exclusions.
///
/// If specific files are requested, only matching entries are kept; a
/// pattern without wildcards matches the full path or the base name.
fn select_entries<'a>(
    archive: &'a Archive<Box<dyn ChannelInput>>,
    cli: &Cli,
    include_dirs: bool,
) -> Vec<EntryRef<'a>> {
    archive
        .iter()
        .filter(|e| include_dirs || !e.is_dir())
        .filter(|e| {
            let name = e.path();
            let requested =
                cli.files.is_empty() || cli.files.iter().any(|f| names_entry(f, &name));
            let excluded = cli
                .exclude
                .iter()
                .any(|x| name.contains(x.as_str()) || glob_match(x, &name));
            requested && !excluded
        })
        .collect()
}

/// Whether a requested name selects `path`: a glob against the full path,
/// otherwise an exact match on the path or its last component.
fn names_entry(request: &str, path: &str) -> bool {
    if request.contains(['*', '?']) {
        return glob_match(request, path);
    }
    path == request || path.trim_end_matches('/').rsplit('/').next() == Some(request)
}

/// One path per line, or with `verbose` a table with a totals footer.
fn list_files(archive: &Archive<Box<dyn ChannelInput>>, verbose: bool) {
    if verbose {
        println!(
            "{:>10}  {:>10}  {:>5}  {:>7}  {:>10}  {:>5}  Name",
            "Length", "Size", "Cmpr", "Method", "Date", "Time"
        );
        println!("{}", "-".repeat(79));
    }

    let mut total_uncompressed = 0u64;
    let mut total_compressed = 0u64;
    let mut file_count = 0usize;

    for entry in archive.iter() {
        if !verbose {
            println!("{}", entry.path());
            continue;
        }

        let date = entry
            .modified()
            .map(|t| t.format("%Y-%m-%d  %H:%M").to_string())
            .unwrap_or_else(|| "----------  -----".to_string());
        println!(
            "{:>10}  {:>10}  {}  {:>7}  {}  {}",
            entry.uncompressed_size,
            entry.compressed_size,
            ratio(entry.compressed_size, entry.uncompressed_size),
            entry.compression_method.to_string(),
            date,
            entry.path()
        );

        if !entry.is_dir() {
            total_uncompressed += entry.uncompressed_size;
            total_compressed += entry.compressed_size;
            file_count += 1;
        }
    }

    if verbose {
        println!("{}", "-".repeat(79));
        println!(
            "{:>10}  {:>10}  {}  {:>28}  {} files",
            total_uncompressed,
            total_compressed,
            ratio(total_compressed, total_uncompressed),
            "",
            file_count
        );
        if !archive.comment().is_empty() {
            println!("{}", String::from_utf8_lossy(archive.comment()));
        }
    }
}

/// Compression ratio as percentage saved.
fn ratio(compressed: u64, uncompressed: u64) -> String {
    let saved = if uncompressed == 0 || compressed >= uncompressed {
        0
    } else {
        100 - compressed * 100 / uncompressed
    };
    format!("{saved:>4}%")
}

/// Decompress every entry, reporting failures without stopping at the first.
fn test_archive(archive: &Archive<Box<dyn ChannelInput>>, cli: &Cli) -> Result<()> {
    let mut failures = 0usize;
    for (entry, result) in archive.iter().zip(archive.verify_all()) {
        match result {
            Ok(()) => {
                if !cli.is_quiet() {
                    println!("    testing: {:<40}  OK", entry.path());
                }
            }
            Err(err) => {
                failures += 1;
                println!("    testing: {:<40}  {err}", entry.path());
            }
        }
    }

    if failures > 0 {
        bail!("{failures} of {} entries failed", archive.len());
    }
    if !cli.is_very_quiet() {
        println!("No errors detected in {}.", cli.file);
    }
    Ok(())
}

/// Copy the selected entries without recompressing them.
fn repack(selected: &[EntryRef<'_>], comment: &[u8], out: &Path, cli: &Cli) -> Result<()> {
    let mut builder = ArchiveBuilder::new();
    builder.set_comment(comment);
    for entry in selected {
        builder.push(
            entry
                .pass_through()
                .with_context(|| format!("cannot copy {}", entry.path()))?,
        );
    }

    let output = FileChannelOutput::create(out)
        .with_context(|| format!("cannot create {}", out.display()))?;
    let output = builder
        .write_to(output)
        .with_context(|| format!("cannot write {}", out.display()))?;

    if !cli.is_quiet() {
        println!(
            "  repacked: {} entries into {} ({})",
            selected.len(),
            out.display(),
            format_size(output.current_offset())
        );
    }
    Ok(())
}

/// Writes one entry to stdout or below the output directory.
fn extract_file(entry: &EntryRef<'_>, cli: &Cli, show_filename: bool) -> Result<()> {
    let name = entry.path();

    if cli.pipe {
        let stdout = io::stdout();
        let mut stdout = stdout.lock();
        if show_filename {
            writeln!(stdout, "--- {name} ---")?;
        }
        let mut reader = entry.reader()?;
        io::copy(&mut reader, &mut stdout).with_context(|| format!("cannot extract {name}"))?;
        return Ok(());
    }

    let Some(relative) = safe_relative_path(&name) else {
        warn!(path = %name, "skipping entry with unsafe path");
        return Ok(());
    };
    let relative = if cli.junk_paths {
        match relative.file_name() {
            Some(base) => PathBuf::from(base),
            None => relative,
        }
    } else {
        relative
    };
    let output_path = match &cli.extract_dir {
        Some(dir) => PathBuf::from(dir).join(relative),
        None => relative,
    };

    // -n wins over -o.
    if output_path.exists() && (cli.never_overwrite || !cli.overwrite) {
        if !cli.is_quiet() {
            let hint = if cli.never_overwrite { "exists" } else { "exists, -o to overwrite" };
            eprintln!("  skipping: {name} ({hint})");
        }
        return Ok(());
    }

    if !cli.is_quiet() {
        println!("  extracting: {name}");
    }

    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut reader = entry.reader()?;
    let mut file = BufWriter::new(File::create(&output_path)?);
    let result = io::copy(&mut reader, &mut file).and_then(|_| file.flush());
    if let Err(err) = result {
        drop(file);
        let _ = fs::remove_file(&output_path);
        return Err(err).with_context(|| format!("cannot extract {name}"));
    }

    set_mode(&output_path, entry.unix_mode())?;
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: Option<u32>) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    match mode {
        Some(mode) => fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o777)),
        None => Ok(()),
    }
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: Option<u32>) -> io::Result<()> {
    Ok(())
}

/// The entry name as a relative path, or `None` if it could escape the
/// destination directory.
fn safe_relative_path(name: &str) -> Option<PathBuf> {
    let mut path = PathBuf::new();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    (!path.as_os_str().is_empty()).then_some(path)
}

/// `*` and `?` wildcard match over the whole of `text`.
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    // Position of the last `*` and the text index it currently swallows up to.
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                star = Some((p, t));
                p += 1;
            }
            Some(&c) if c == '?' || c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match star {
                Some((sp, st)) => {
                    p = sp + 1;
                    t = st + 1;
                    star = Some((sp, st + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}

fn format_size(size: u64) -> String {
    const UNITS: [&str; 3] = ["KB", "MB", "GB"];
    if size < 1024 {
        return format!("{size} bytes");
    }
    let mut value = size as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_wildcards() {
        assert!(glob_match("*.txt", "readme.txt"));
        assert!(glob_match("file?.dat", "file1.dat"));
        assert!(glob_match("docs/*", "docs/a/b.md"));
        assert!(!glob_match("*.txt", "readme.md"));
        assert!(glob_match("a*b*c", "aXbYbZc"));
        assert!(!glob_match("a?", "a"));
    }

    #[test]
    fn plain_names_match_path_or_base_name() {
        assert!(names_entry("b.txt", "a/b.txt"));
        assert!(names_entry("a/b.txt", "a/b.txt"));
        assert!(names_entry("docs", "docs/"));
        assert!(!names_entry("b", "a/b.txt"));
    }

    #[test]
    fn unsafe_paths_are_refused() {
        assert_eq!(safe_relative_path("a/./b.txt"), Some(PathBuf::from("a/b.txt")));
        assert_eq!(safe_relative_path("../evil"), None);
        assert_eq!(safe_relative_path("a/../../evil"), None);
        assert_eq!(safe_relative_path("/etc/passwd"), None);
        assert_eq!(safe_relative_path("./"), None);
    }

    #[test]
    fn sizes_and_ratios() {
        assert_eq!(format_size(500), "500 bytes");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(1048576), "1.00 MB");
        assert_eq!(ratio(25, 100), "  75%");
        assert_eq!(ratio(0, 0), "   0%");
        assert_eq!(ratio(120, 100), "   0%");
        assert_eq!(ratio(0, 0).len(), ratio(25, 100).len());
    }
}
