pub const USAGE_MSG: &str = "\
usage: bgexec [options] [NAME=VALUE...] [--] command [args...] [| command...] [&]
       bgexec -h | -V";

const DESCRIPTOR: &str = "bgexec - run a pipeline and collect its output as it arrives";

const HELP_MSG: &str = "Options:
  --status-var=name             name under which the exit status is reported
  --on-output=command           run command with each block of standard output appended
  --on-error=command            run command with each block of standard error appended
  -e, --echo=none|output|error|both
                                copy the collected streams to our own as they arrive
  --encode-output=encoding      decode standard output from encoding (or 'binary')
  --encode-error=encoding       decode standard error from encoding (or 'binary')
  -k, --keep-newline            keep the trailing newline of output
  -l, --line-buffered           deliver output to callbacks one line at a time
  -i, --ignore-exit-code        do not fail when the pipeline exits abnormally
  --poll-interval=ms            how often to check for termination after output closed
                                (default 1000)
  --kill-signal=signal          signal sent when cancelled (default TERM, or HUP with
                                --session and --pty)
  -d, --detach                  do not kill the pipeline when bgexec exits
  -s, --session                 run the pipeline in its own session
  -t, --pty                     run the pipeline on a pseudo-terminal
  --env=NAME=VALUE              set an environment variable for the pipeline
  -h, --help                    display help message and exit
  -V, --version                 display version information and exit
  --                            stop processing command line arguments

Pipelines:
  a | b, a |& b                 pipe standard output (and error) of a into b
  < file, << text               standard input from a file or a literal text
  > file, >> file               write or append standard output to a file
  2> file, 2>> file             write or append standard error to a file
  >& file, >>& file             write or append both streams to a file
  2>@1                          merge standard error into standard output
  &                             as the last word: run in the background";

pub fn long_help_message() -> String {
    format!("{DESCRIPTOR}\n{USAGE_MSG}\n{HELP_MSG}")
}
