//! Splitting a command line into pipeline stages and redirections.
//!
//! Words are taken as-is; the only special words are the pipe and redirection operators:
//!
//! | word              | meaning                                            |
//! |-------------------|----------------------------------------------------|
//! | `\|`, `\|&`       | start a new stage, `\|&` also pipes standard error |
//! | `< file`          | read standard input from `file`                    |
//! | `<< text`         | feed `text` as standard input                      |
//! | `> file`, `>> file`   | write (append) standard output to `file`       |
//! | `2> file`, `2>> file` | write (append) standard error to `file`        |
//! | `>& file`, `>>& file` | write (append) both streams to `file`          |
//! | `2>@1`            | send standard error where standard output goes     |
//! | trailing `&`      | run detached                                       |
//!
//! Operators may be glued to their operand (`<input.txt`).
use std::path::PathBuf;

use crate::common::Error;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Stage {
    pub(crate) argv: Vec<String>,
    /// Standard error joins standard output into the pipe to the next stage.
    pub(crate) pipe_stderr: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) enum Input {
    /// The first stage inherits our standard input.
    #[default]
    Inherit,
    File(PathBuf),
    Literal(String),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) enum Output {
    /// Collected through a sink.
    #[default]
    Collect,
    File { path: PathBuf, append: bool },
    /// Standard error only: goes wherever standard output goes.
    Stdout,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct Pipeline {
    pub(crate) stages: Vec<Stage>,
    pub(crate) stdin: Input,
    pub(crate) stdout: Output,
    pub(crate) stderr: Output,
    pub(crate) background: bool,
}

impl Pipeline {
    /// Whether neither stream of the pipeline reaches a sink.
    pub(crate) fn is_fully_redirected(&self) -> bool {
        !self.collects_stdout() && !self.collects_stderr()
    }

    pub(crate) fn collects_stdout(&self) -> bool {
        self.stdout == Output::Collect
    }

    pub(crate) fn collects_stderr(&self) -> bool {
        self.stderr == Output::Collect
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::Pipeline(message.into())
}

/// Take the operand of `op`, either glued to it or as the next word.
fn operand<'a>(
    op: &str,
    glued: &'a str,
    words: &mut impl Iterator<Item = &'a String>,
) -> Result<&'a str, Error> {
    if !glued.is_empty() {
        return Ok(glued);
    }
    words
        .next()
        .map(String::as_str)
        .ok_or_else(|| invalid(format!("can't specify \"{op}\" as last word in command")))
}

fn file_output(path: &str, append: bool) -> Output {
    Output::File {
        path: PathBuf::from(path),
        append,
    }
}

pub(crate) fn parse(words: &[String]) -> Result<Pipeline, Error> {
    let mut pipeline = Pipeline::default();
    let mut argv = Vec::new();
    let mut iter = words.iter().peekable();

    while let Some(word) = iter.next() {
        let word = word.as_str();
        match word {
            "|" | "|&" => {
                if argv.is_empty() {
                    return Err(invalid("illegal use of | or |& in command"));
                }
                pipeline.stages.push(Stage {
                    argv: std::mem::take(&mut argv),
                    pipe_stderr: word == "|&",
                });
            }
            "&" => {
                if iter.peek().is_some() {
                    return Err(invalid("illegal use of & in command"));
                }
                pipeline.background = true;
            }
            "2>@1" => pipeline.stderr = Output::Stdout,
            _ if word.starts_with("2>>") => {
                let path = operand("2>>", &word[3..], &mut iter)?;
                pipeline.stderr = file_output(path, true);
            }
            _ if word.starts_with("2>") => {
                let path = operand("2>", &word[2..], &mut iter)?;
                pipeline.stderr = file_output(path, false);
            }
            _ if word.starts_with(">>&") => {
                let path = operand(">>&", &word[3..], &mut iter)?;
                pipeline.stdout = file_output(path, true);
                pipeline.stderr = Output::Stdout;
            }
            _ if word.starts_with(">&") => {
                let path = operand(">&", &word[2..], &mut iter)?;
                pipeline.stdout = file_output(path, false);
                pipeline.stderr = Output::Stdout;
            }
            _ if word.starts_with(">>") => {
                let path = operand(">>", &word[2..], &mut iter)?;
                pipeline.stdout = file_output(path, true);
            }
            _ if word.starts_with('>') => {
                let path = operand(">", &word[1..], &mut iter)?;
                pipeline.stdout = file_output(path, false);
            }
            _ if word.starts_with("<<") => {
                let text = operand("<<", &word[2..], &mut iter)?;
                pipeline.stdin = Input::Literal(text.to_string());
            }
            _ if word.starts_with('<') => {
                let path = operand("<", &word[1..], &mut iter)?;
                pipeline.stdin = Input::File(PathBuf::from(path));
            }
            _ => argv.push(word.to_string()),
        }
    }

    if argv.is_empty() {
        return Err(if pipeline.stages.is_empty() {
            invalid("no command given")
        } else {
            invalid("illegal use of | or |& in command")
        });
    }
    pipeline.stages.push(Stage {
        argv,
        pipe_stderr: false,
    });

    Ok(pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn words(line: &str) -> Vec<String> {
        line.split_whitespace().map(str::to_string).collect()
    }

    fn stage(line: &str, pipe_stderr: bool) -> Stage {
        Stage {
            argv: words(line),
            pipe_stderr,
        }
    }

    #[test]
    fn single_command() {
        let pipeline = parse(&words("echo hi")).unwrap();
        assert_eq!(pipeline.stages, vec![stage("echo hi", false)]);
        assert_eq!(pipeline.stdin, Input::Inherit);
        assert!(pipeline.collects_stdout() && pipeline.collects_stderr());
        assert!(!pipeline.background);
    }

    #[test]
    fn stages_and_redirections() {
        let pipeline =
            parse(&words("cat <in.txt | sort -r |& uniq -c >> out.txt 2>@1 &")).unwrap();
        assert_eq!(
            pipeline,
            Pipeline {
                stages: vec![
                    stage("cat", false),
                    stage("sort -r", true),
                    stage("uniq -c", false)
                ],
                stdin: Input::File("in.txt".into()),
                stdout: Output::File {
                    path: "out.txt".into(),
                    append: true
                },
                stderr: Output::Stdout,
                background: true,
            }
        );
        assert!(pipeline.is_fully_redirected());
    }

    #[test]
    fn separate_operands() {
        let pipeline = parse(&words("tr a b << abc 2> err.log")).unwrap();
        assert_eq!(pipeline.stdin, Input::Literal("abc".into()));
        assert_eq!(
            pipeline.stderr,
            Output::File {
                path: "err.log".into(),
                append: false
            }
        );
        assert!(pipeline.collects_stdout());
        assert!(!pipeline.is_fully_redirected());

        let both = parse(&words("make >&build.log")).unwrap();
        assert_eq!(both.stderr, Output::Stdout);
        assert!(both.is_fully_redirected());
    }

    #[test]
    fn malformed_pipelines() {
        for line in ["", "| wc", "ls |", "ls | | wc", "ls & wc", "cat <"] {
            assert!(
                matches!(parse(&words(line)), Err(Error::Pipeline(_))),
                "{line:?} should be rejected"
            );
        }
    }
}
