use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use clap::CommandFactory;
use clap_complete::Shell;

use crate::cli::{Cli, CompletionShell};
use crate::error::CliError;

impl From<CompletionShell> for Shell {
    fn from(shell: CompletionShell) -> Self {
        match shell {
            CompletionShell::Bash => Self::Bash,
            CompletionShell::Zsh => Self::Zsh,
            CompletionShell::Fish => Self::Fish,
        }
    }
}

/// Write the completion script for `shell` into `sink`
pub fn write_completions(shell: CompletionShell, sink: &mut dyn Write) -> io::Result<()> {
    let mut command = Cli::command();
    let bin_name = command.get_name().to_string();
    clap_complete::generate(Shell::from(shell), &mut command, bin_name, sink);
    sink.flush()
}

/// Print the script, or save it to `output_path` and print where it went
pub fn run_completions(shell: CompletionShell, output_path: Option<&Path>) -> Result<(), CliError> {
    let Some(path) = output_path else {
        write_completions(shell, &mut io::stdout().lock())?;
        return Ok(());
    };

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut file = BufWriter::new(File::create(path)?);
    write_completions(shell, &mut file)?;
    tracing::debug!(path = %path.display(), ?shell, "Wrote completion script");
    println!("{}", path.display());
    Ok(())
}
