#![forbid(unsafe_code)]

use std::time::Duration;

use crate::exec::{Echo, ExecOptions, SignalNumber, StreamEncoding};
use crate::system::signal::parse_signal;

pub mod help;

#[cfg(test)]
mod tests;

#[derive(Debug, Default, PartialEq, Clone)]
pub enum BgexecAction {
    #[default]
    Help,
    Version,
    Run(Vec<String>),
}

#[derive(Debug, Default, PartialEq, Clone)]
pub struct BgexecOptions {
    pub status_var: Option<String>,
    pub on_output: Option<Vec<String>>,
    pub on_error: Option<Vec<String>>,
    pub echo: Echo,
    pub encode_output: Option<StreamEncoding>,
    pub encode_error: Option<StreamEncoding>,
    pub keep_newline: bool,
    pub line_buffered: bool,
    pub ignore_exit_code: bool,
    pub poll_interval: Option<Duration>,
    pub kill_signal: Option<SignalNumber>,
    pub detach: bool,
    pub session: bool,
    pub pty: bool,
    // environment overrides, from `--env` and leading assignments
    pub env_var_list: Vec<(String, String)>,
    // resulting action enum
    pub action: BgexecAction,
    help: bool,
    version: bool,
    // the pipeline, starting at the first word that is not an option
    external_args: Vec<String>,
}

enum BgexecArg {
    Flag(String),
    Argument(String, String),
    Environment(String, String),
    Rest(Vec<String>),
}

impl BgexecOptions {
    const TAKES_ARGUMENT_SHORT: &[char] = &['e'];
    const TAKES_ARGUMENT: &[&'static str] = &[
        "status-var",
        "on-output",
        "on-error",
        "echo",
        "encode-output",
        "encode-error",
        "poll-interval",
        "kill-signal",
        "env",
    ];

    /// split `--name=value`, expand short flag clusters and find where the pipeline starts
    fn normalize_arguments<I>(iter: I) -> Result<Vec<BgexecArg>, String>
    where
        I: IntoIterator<Item = String>,
    {
        // skip the program name
        let mut arg_iter = iter.into_iter().skip(1);
        let mut processed = Vec::new();

        while let Some(arg) = arg_iter.next() {
            match arg.as_str() {
                "--" => {
                    processed.push(BgexecArg::Rest(arg_iter.collect()));
                    break;
                }
                long_arg if long_arg.starts_with("--") => {
                    if let Some((key, value)) = long_arg.split_once('=') {
                        if !Self::TAKES_ARGUMENT.contains(&&key[2..]) {
                            Err(format!("'{key}' does not take any arguments"))?;
                        }
                        processed.push(BgexecArg::Argument(key.to_string(), value.to_string()));
                    } else if Self::TAKES_ARGUMENT.contains(&&long_arg[2..]) {
                        let value = arg_iter
                            .next()
                            .ok_or_else(|| format!("'{long_arg}' expects an argument"))?;
                        processed.push(BgexecArg::Argument(arg, value));
                    } else {
                        processed.push(BgexecArg::Flag(arg));
                    }
                }
                short_arg if short_arg.starts_with('-') && short_arg.len() > 1 => {
                    for (n, char) in short_arg[1..].char_indices() {
                        let flag = format!("-{char}");
                        if Self::TAKES_ARGUMENT_SHORT.contains(&char) {
                            // the rest of the cluster is the value, or else the next word
                            let rest = &short_arg[n + 2..];
                            let value = if !rest.is_empty() {
                                rest.to_string()
                            } else {
                                arg_iter
                                    .next()
                                    .ok_or_else(|| format!("'{flag}' expects an argument"))?
                            };
                            processed.push(BgexecArg::Argument(flag, value));
                            break;
                        }
                        processed.push(BgexecArg::Flag(flag));
                    }
                }
                assignment if Self::try_to_env_var(assignment).is_some() => {
                    if let Some((key, value)) = Self::try_to_env_var(assignment) {
                        processed.push(BgexecArg::Environment(key, value));
                    }
                }
                _command => {
                    let mut rest = vec![arg];
                    rest.extend(arg_iter);
                    processed.push(BgexecArg::Rest(rest));
                    break;
                }
            }
        }

        Ok(processed)
    }

    /// parse a `NAME=VALUE` environment assignment
    fn try_to_env_var(arg: &str) -> Option<(String, String)> {
        let (name, value) = arg.split_once('=')?;
        let valid = name.chars().next().is_some_and(|c| !c.is_ascii_digit())
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        valid.then(|| (name.to_string(), value.to_string()))
    }

    /// parse command line arguments from the environment
    pub fn from_env() -> Result<BgexecOptions, String> {
        Self::try_parse_from(std::env::args())
    }

    fn resolve_action(&mut self) {
        if self.help {
            self.action = BgexecAction::Help;
        } else if self.version {
            self.action = BgexecAction::Version;
        } else {
            self.action = BgexecAction::Run(std::mem::take(&mut self.external_args));
        }
    }

    /// verify the combination of arguments makes sense for the action
    fn validate(&self) -> Result<(), String> {
        if let BgexecAction::Run(args) = &self.action {
            if args.is_empty() {
                Err("no command specified")?;
            }
        }

        if self.poll_interval == Some(Duration::ZERO) {
            Err("'--poll-interval' must be at least 1 millisecond")?;
        }

        Ok(())
    }

    fn words(value: &str, option: &str) -> Result<Vec<String>, String> {
        let words: Vec<String> = value.split_whitespace().map(str::to_string).collect();
        if words.is_empty() {
            Err(format!("'{option}' expects a command"))?;
        }
        Ok(words)
    }

    /// parse an iterator over command line arguments
    pub fn try_parse_from<I, T>(iter: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = T>,
        T: Into<String> + Clone,
    {
        let mut options = BgexecOptions::default();
        let args = Self::normalize_arguments(iter.into_iter().map(Into::into))?;

        for arg in args {
            match arg {
                BgexecArg::Flag(flag) => match flag.as_str() {
                    "-d" | "--detach" => options.detach = true,
                    "-h" | "--help" => options.help = true,
                    "-i" | "--ignore-exit-code" => options.ignore_exit_code = true,
                    "-k" | "--keep-newline" => options.keep_newline = true,
                    "-l" | "--line-buffered" => options.line_buffered = true,
                    "-s" | "--session" => options.session = true,
                    "-t" | "--pty" => options.pty = true,
                    "-V" | "--version" => options.version = true,
                    option => Err(format!("invalid option '{option}'"))?,
                },
                BgexecArg::Argument(option, value) => match option.as_str() {
                    "--status-var" => options.status_var = Some(value),
                    "--on-output" => options.on_output = Some(Self::words(&value, &option)?),
                    "--on-error" => options.on_error = Some(Self::words(&value, &option)?),
                    "-e" | "--echo" => {
                        options.echo = value.parse().map_err(|err| format!("{err}"))?;
                    }
                    "--encode-output" => {
                        options.encode_output =
                            Some(value.parse().map_err(|err| format!("{err}"))?);
                    }
                    "--encode-error" => {
                        options.encode_error = Some(value.parse().map_err(|err| format!("{err}"))?);
                    }
                    "--poll-interval" => {
                        let millis = value
                            .parse::<u64>()
                            .map_err(|_| format!("invalid poll interval '{value}'"))?;
                        options.poll_interval = Some(Duration::from_millis(millis));
                    }
                    "--kill-signal" => {
                        let signal =
                            parse_signal(&value).ok_or_else(|| format!("unknown signal '{value}'"))?;
                        options.kill_signal = Some(signal);
                    }
                    "--env" => {
                        let assignment = Self::try_to_env_var(&value)
                            .ok_or_else(|| format!("invalid environment assignment '{value}'"))?;
                        options.env_var_list.push(assignment);
                    }
                    option => Err(format!("invalid option '{option}'"))?,
                },
                BgexecArg::Environment(key, value) => {
                    options.env_var_list.push((key, value));
                }
                BgexecArg::Rest(rest) => {
                    options.external_args = rest;
                }
            }
        }

        options.resolve_action();
        options.validate()?;

        Ok(options)
    }

    /// The library configuration these arguments describe.
    pub fn exec_options(&self) -> ExecOptions {
        let mut exec = ExecOptions {
            keep_newline: self.keep_newline,
            line_buffered: self.line_buffered,
            ignore_exit_code: self.ignore_exit_code,
            kill_signal: self.kill_signal,
            detach: self.detach,
            session: self.session,
            pty: self.pty,
            env: self.env_var_list.clone(),
            ..Default::default()
        };
        if let Some(interval) = self.poll_interval {
            exec.poll_interval = interval;
        }
        exec.set_echo(self.echo);
        exec.stdout.callback = self.on_output.clone();
        exec.stderr.callback = self.on_error.clone();
        if let Some(encoding) = self.encode_output {
            exec.stdout.encoding = encoding;
        }
        if let Some(encoding) = self.encode_error {
            exec.stderr.encoding = encoding;
        }
        exec
    }
}
