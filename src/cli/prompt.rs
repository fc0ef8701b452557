//! Interactive yes/no prompts on stdin.
//!
//! Stages ask before deleting files or before running a long local job;
//! `--yes` answers every question without reading stdin.

use std::io::{self, BufRead, Write};

use crate::error::AppError;

/// Ask `question` until the operator answers yes or no.
///
/// End of input counts as "no".
pub fn confirm(question: &str, assume_yes: bool) -> Result<bool, AppError> {
    if assume_yes {
        println!("{question} [y/n]: y (--yes)");
        return Ok(true);
    }
    let stdin = io::stdin();
    confirm_from(question, &mut stdin.lock(), &mut io::stdout())
}

fn confirm_from(
    question: &str,
    input: &mut dyn BufRead,
    output: &mut dyn Write,
) -> Result<bool, AppError> {
    loop {
        write!(output, "{question} [y/n]: ")
            .and_then(|_| output.flush())
            .map_err(|e| AppError::new(2, format!("Failed to write prompt: {e}")))?;

        let mut line = String::new();
        let bytes = input
            .read_line(&mut line)
            .map_err(|e| AppError::new(2, format!("Failed to read input: {e}")))?;
        if bytes == 0 {
            return Ok(false);
        }

        match parse_answer(&line) {
            Some(answer) => return Ok(answer),
            None => {
                writeln!(output, "Please answer y or n.")
                    .map_err(|e| AppError::new(2, format!("Failed to write prompt: {e}")))?;
            }
        }
    }
}

fn parse_answer(line: &str) -> Option<bool> {
    match line.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reprompts_until_a_valid_answer() {
        let mut input = "maybe\n  YES \n".as_bytes();
        let mut output = Vec::new();
        assert!(confirm_from("Run locally?", &mut input, &mut output).unwrap());
        let shown = String::from_utf8(output).unwrap();
        assert_eq!(shown.matches("Run locally? [y/n]: ").count(), 2);
        assert!(shown.contains("Please answer y or n."));
    }

    #[test]
    fn end_of_input_means_no() {
        let mut input = "".as_bytes();
        assert!(!confirm_from("Delete?", &mut input, &mut Vec::<u8>::new()).unwrap());
        let mut input = "n\n".as_bytes();
        assert!(!confirm_from("Delete?", &mut input, &mut Vec::<u8>::new()).unwrap());
    }
}
