//! Terminal implementations of the operator seams

use async_trait::async_trait;
use statekeep_core::{Input, InputError, InputOpts, Ui};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// Writes output to stdout and errors to stderr
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct TerminalUi;

impl Ui for TerminalUi {
    fn output(&self, message: &str) {
        println!("{message}");
    }

    fn error(&self, message: &str) {
        eprintln!("{message}");
    }
}

/// Reads answers line by line from stdin
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct StdinInput;

fn render_prompt(opts: &InputOpts) -> String {
    let description: String = opts
        .description
        .lines()
        .map(|line| format!("  {line}\n"))
        .collect();
    format!("{}\n{description}\n  Enter a value: ", opts.query)
}

#[async_trait]
impl Input for StdinInput {
    async fn input(&self, opts: &InputOpts) -> Result<String, InputError> {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(render_prompt(opts).as_bytes()).await?;
        stdout.flush().await?;

        let mut line = String::new();
        let read = BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
        if read == 0 {
            return Err(InputError::Closed);
        }
        println!();
        Ok(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_indents_description() {
        let opts = InputOpts::new("id", "Proceed?", "first line\nsecond line");
        assert_eq!(
            render_prompt(&opts),
            "Proceed?\n  first line\n  second line\n\n  Enter a value: "
        );
    }
}
