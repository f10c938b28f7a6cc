use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "zipkit")]
#[command(version)]
#[command(about = "Inspect, extract and repack ZIP archives, local or over HTTP", long_about = None)]
#[command(after_help = "Examples:\n  \
  zipkit data1.zip -x joe        extract all files except joe from data1.zip\n  \
  zipkit -p foo.zip | more       send contents of foo.zip via pipe into more\n  \
  zipkit -t foo.zip              check every entry's CRC-32\n  \
  zipkit foo.zip '*.txt' --repack texts.zip   copy the text files into a new archive\n  \
  zipkit -l https://example.com/archive.zip   list files from remote ZIP")]
pub struct Cli {
    /// Archive to open: a local path or an http(s) URL
    #[arg(value_name = "FILE")]
    pub file: String,

    /// Entry names or glob patterns to select (all entries when empty)
    #[arg(value_name = "FILES")]
    pub files: Vec<String>,

    /// List entries instead of extracting
    #[arg(short = 'l')]
    pub list: bool,

    /// List entries as a table with sizes, ratio, method and date
    #[arg(short = 'v')]
    pub verbose: bool,

    /// Write selected entries to stdout, with no messages
    #[arg(short = 'p')]
    pub pipe: bool,

    /// Test archive integrity
    #[arg(short = 't')]
    pub test: bool,

    /// Directory to extract into
    #[arg(short = 'd', value_name = "DIR")]
    pub extract_dir: Option<String>,

    /// Skip entries matching these names or patterns
    #[arg(short = 'x', value_name = "FILE", num_args = 1..)]
    pub exclude: Vec<String>,

    /// Keep existing files untouched
    #[arg(short = 'n')]
    pub never_overwrite: bool,

    /// Replace existing files
    #[arg(short = 'o')]
    pub overwrite: bool,

    /// Drop directory components and extract flat
    #[arg(short = 'j')]
    pub junk_paths: bool,

    /// Less output; repeat for silence
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,

    /// Copy the selected entries, without recompressing, into a new archive
    #[arg(long, value_name = "OUT")]
    pub repack: Option<String>,

    /// Byte offset of the archive inside a larger local file
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub offset_bias: u64,
}

impl Cli {
    pub fn is_http_url(&self) -> bool {
        self.file.starts_with("http://") || self.file.starts_with("https://")
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet > 0 || self.pipe
    }

    pub fn is_very_quiet(&self) -> bool {
        self.quiet > 1
    }
}
