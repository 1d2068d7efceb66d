use std::io::{self, BufRead, Write};

use powderdose_control::{ControlError, Operator, OperatorInput, Prompt, Result};
use tracing::warn;

/// Asks a person at the terminal.
///
/// Prompts go to `output` (stderr for the CLI) so that stdout carries only
/// the command's result. Typing `abort` at any prompt, or closing input,
/// aborts the procedure.
pub struct TerminalOperator<R, W> {
    input: R,
    output: W,
}

impl TerminalOperator<io::StdinLock<'static>, io::Stderr> {
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stderr())
    }
}

impl<R: BufRead, W: Write> TerminalOperator<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn ask(&mut self, text: &str) -> Result<String> {
        let _ = write!(self.output, "{text} ");
        let _ = self.output.flush();
        let mut line = String::new();
        match self.input.read_line(&mut line) {
            Ok(0) => Err(ControlError::Aborted),
            Ok(_) => Ok(line.trim().to_string()),
            Err(err) => {
                warn!(error = %err, "failed to read operator input");
                Err(ControlError::Aborted)
            }
        }
    }

    fn complain(&mut self, answer: &str) {
        let _ = writeln!(self.output, "Not understood: {answer:?}");
    }
}

impl<R: BufRead, W: Write> Operator for TerminalOperator<R, W> {
    fn respond(&mut self, prompt: &Prompt) -> Result<OperatorInput> {
        loop {
            let question = match prompt {
                Prompt::MeasuredMass { .. } => format!("{prompt} (g):"),
                Prompt::NextWeight => format!("{prompt} (g or 'done'):"),
                _ => format!("{prompt} [Enter]"),
            };
            let answer = self.ask(&question)?;
            if answer.eq_ignore_ascii_case("abort") {
                return Ok(OperatorInput::Abort);
            }
            let input = match prompt {
                Prompt::MeasuredMass { .. } => parse_grams(&answer).map(OperatorInput::Mass),
                Prompt::NextWeight if answer.eq_ignore_ascii_case("done") => {
                    Some(OperatorInput::Finish)
                }
                Prompt::NextWeight => parse_grams(&answer).map(OperatorInput::Weight),
                _ => Some(OperatorInput::Continue),
            };
            match input {
                Some(input) => return Ok(input),
                None => self.complain(&answer),
            }
        }
    }
}

fn parse_grams(answer: &str) -> Option<f64> {
    let grams: f64 = answer.trim_end_matches('g').trim().parse().ok()?;
    (grams.is_finite() && grams >= 0.0).then_some(grams)
}
