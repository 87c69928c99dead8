use crate::{
    channel::{ChannelConfig, Compression, DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_MESSAGE_SIZE},
    engine::{
        ConnectionMode, EngineConfig, FailurePolicy, ProcessingMode, ProcessorErrorPolicy,
        service::config::DEFAULT_MAX_TASKS,
        streaming::request::{RequestOverrides, RequestTemplate},
    },
    processors::DEFAULT_PROCESSOR,
    sink::output_filename,
};
use anyhow::{Context, bail};
use clap::Parser;
use core::time::Duration;
use firehose_extract_core::{BlockRange, Chain, FilterExpression};
use std::path::{Path, PathBuf};

/// Command line of the `firehose-extract` binary.
///
/// Every option can also be set through the environment variable named in
/// its help text; a `.env` file in the working directory is loaded first.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "firehose-extract",
    version,
    about = "Search the blockchain for transactions targeting specific accounts over a given period, powered by Firehose"
)]
pub struct CliArgs {
    /// Target account(s) followed by the first and the end block numbers
    /// (`ACCOUNT... BLOCK_START BLOCK_END`). The end block is exclusive.
    #[arg(num_args = 3.., required = true, value_name = "ACCOUNT... BLOCK_START BLOCK_END")]
    pub targets: Vec<String>,

    /// Target blockchain: eos, wax, kylin or jungle4.
    ///
    /// Environment variable: `FIREHOSE_CHAIN`
    #[arg(short, long, env = "FIREHOSE_CHAIN", default_value_t = Chain::Eos)]
    pub chain: Chain,

    /// Maximum number of concurrent tasks running for block streaming.
    ///
    /// Environment variable: `MAX_TASKS`
    #[arg(short = 'n', long, env = "MAX_TASKS", default_value_t = DEFAULT_MAX_TASKS)]
    pub max_tasks: usize,

    /// Custom filter for the Firehose stream to tag included transactions.
    /// An empty value keeps the default account filter.
    #[arg(short = 'i', long)]
    pub custom_include_expr: Option<String>,

    /// Custom filter for the Firehose stream to exclude transactions. An
    /// empty value keeps the default exclusion.
    #[arg(short = 'x', long)]
    pub custom_exclude_expr: Option<String>,

    /// Name of the block processor turning blocks into rows.
    #[arg(short = 'p', long, default_value = DEFAULT_PROCESSOR)]
    pub custom_processor: String,

    /// Accept a block processor whose declared block type does not match the
    /// chain's.
    #[arg(long, default_value_t = false)]
    pub disable_signature_check: bool,

    /// Output file. Defaults to
    /// `jsonl/{chain}_{accounts}_{start}_to_{end}.jsonl`.
    #[arg(short, long)]
    pub out_file: Option<PathBuf>,

    /// Log debug information to a file. Without a path, logs go to
    /// `logs/{datetime}.log`.
    #[arg(short, long, num_args = 0..=1, value_name = "PATH")]
    pub log: Option<Option<PathBuf>>,

    /// Only log errors to the console.
    #[arg(short, long, default_value_t = false)]
    pub quiet: bool,

    /// Firehose endpoint (`host:port` or URI). Defaults to the chain's public
    /// EOS Nation endpoint.
    ///
    /// Environment variable: `FIREHOSE_ENDPOINT`
    #[arg(long, env = "FIREHOSE_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Connect without TLS.
    #[arg(long, default_value_t = false)]
    pub plaintext: bool,

    /// Message compression: none, gzip or zstd.
    ///
    /// Environment variable: `FIREHOSE_COMPRESSION`
    #[arg(long, env = "FIREHOSE_COMPRESSION", default_value_t = Compression::Gzip)]
    pub compression: Compression,

    /// Maximum size in bytes of a single gRPC message.
    ///
    /// Environment variable: `MAX_MESSAGE_SIZE`
    #[arg(long, env = "MAX_MESSAGE_SIZE", default_value_t = DEFAULT_MAX_MESSAGE_SIZE)]
    pub max_message_size: usize,

    /// Open one connection per task instead of sharing one.
    #[arg(long, default_value_t = false)]
    pub connection_per_worker: bool,

    /// Buffer raw blocks and run the processor once each range has streamed.
    #[arg(long, default_value_t = false)]
    pub deferred: bool,

    /// Discard all rows when any range fails.
    #[arg(long, default_value_t = false)]
    pub fail_fast: bool,

    /// Skip blocks the processor rejects instead of failing their range.
    #[arg(long, default_value_t = false)]
    pub skip_processor_errors: bool,

    /// Only stream blocks whose irreversibility satisfies this condition.
    #[arg(long)]
    pub irreversibility_condition: Option<String>,

    /// Pre-issued bearer token. Takes precedence over the JWT exchange.
    ///
    /// Environment variable: `FIREHOSE_TOKEN`
    #[arg(long, env = "FIREHOSE_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Endpoint issuing JWTs in exchange for an API key.
    ///
    /// Environment variable: `AUTH_ENDPOINT`
    #[arg(long, env = "AUTH_ENDPOINT")]
    pub auth_endpoint: Option<String>,

    /// API key exchanged for a JWT.
    ///
    /// Environment variable: `DFUSE_TOKEN`
    #[arg(long, env = "DFUSE_TOKEN", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Where the JWT is cached between runs (24 hours).
    ///
    /// Environment variable: `JWT_CACHE`
    #[arg(long, env = "JWT_CACHE", default_value = "cache/jwt_token.json")]
    pub token_cache: PathBuf,

    /// Timeout in seconds for the JWT exchange.
    #[arg(long, default_value_t = 10)]
    pub auth_timeout: u64,
}

/// How the bearer token is obtained.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthConfig {
    /// No authentication (plaintext local endpoints).
    None,
    Static(String),
    Jwt {
        endpoint: String,
        api_key: String,
        cache: PathBuf,
        timeout: Duration,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogConfig {
    pub file: Option<PathBuf>,
    pub quiet: bool,
}

/// Validated settings for one run.
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub accounts: Vec<String>,
    pub period: BlockRange,
    pub chain: Chain,
    pub processor: String,
    pub check_processor_type: bool,
    pub template: RequestTemplate,
    pub engine: EngineConfig,
    pub channel: ChannelConfig,
    pub auth: AuthConfig,
    pub output: PathBuf,
    pub logging: LogConfig,
}

impl TryFrom<CliArgs> for RunConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let mut targets = args.targets;
        let (Some(end), Some(start)) = (targets.pop(), targets.pop()) else {
            bail!("expected ACCOUNT... BLOCK_START BLOCK_END");
        };
        if targets.is_empty() {
            bail!("at least one account is required");
        }
        let accounts = targets;

        let block_start: u64 = start
            .parse()
            .with_context(|| format!("invalid block_start `{start}`"))?;
        let block_end: u64 = end
            .parse()
            .with_context(|| format!("invalid block_end `{end}`"))?;
        if block_end < block_start {
            bail!("block_start must be less than or equal to block_end");
        }
        let period = BlockRange::new(block_start, block_end)?;

        if args.max_tasks == 0 {
            bail!("MAX_TASKS must be greater than 0");
        }
        if args.max_message_size == 0 {
            bail!("MAX_MESSAGE_SIZE must be greater than 0");
        }

        let filters = FilterExpression::for_accounts(&accounts).with_custom(
            args.custom_include_expr.as_deref(),
            args.custom_exclude_expr.as_deref(),
        );
        let template = RequestTemplate::new(filters).with_overrides(&RequestOverrides {
            irreversibility_condition: args.irreversibility_condition,
            ..Default::default()
        });

        let engine = EngineConfig {
            max_tasks: args.max_tasks,
            processing_mode: if args.deferred {
                ProcessingMode::Deferred
            } else {
                ProcessingMode::Inline
            },
            failure_policy: if args.fail_fast {
                FailurePolicy::FailFast
            } else {
                FailurePolicy::Partial
            },
            processor_errors: if args.skip_processor_errors {
                ProcessorErrorPolicy::Skip
            } else {
                ProcessorErrorPolicy::Abort
            },
            connection_mode: if args.connection_per_worker {
                ConnectionMode::PerWorker
            } else {
                ConnectionMode::Shared
            },
            ..Default::default()
        };

        let channel = ChannelConfig {
            endpoint: args
                .endpoint
                .unwrap_or_else(|| args.chain.default_endpoint()),
            tls: !args.plaintext,
            max_message_size: args.max_message_size,
            compression: args.compression,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        };

        let auth = match (args.token, args.auth_endpoint, args.api_key) {
            (Some(token), _, _) if !token.is_empty() => AuthConfig::Static(token),
            (_, Some(endpoint), Some(api_key)) if !endpoint.is_empty() => AuthConfig::Jwt {
                endpoint,
                api_key,
                cache: args.token_cache,
                timeout: Duration::from_secs(args.auth_timeout),
            },
            _ if args.plaintext => AuthConfig::None,
            _ => bail!(
                "no credentials: set FIREHOSE_TOKEN, or AUTH_ENDPOINT and DFUSE_TOKEN (e.g. in .env)"
            ),
        };

        let output = args
            .out_file
            .unwrap_or_else(|| output_filename(args.chain, &accounts, period));

        let logging = LogConfig {
            file: args.log.map(|path| path.unwrap_or_else(default_log_file)),
            quiet: args.quiet,
        };

        Ok(Self {
            accounts,
            period,
            chain: args.chain,
            processor: args.custom_processor,
            check_processor_type: !args.disable_signature_check,
            template,
            engine,
            channel,
            auth,
            output,
            logging,
        })
    }
}

/// Command line that streams `range` again with the settings of `config`.
///
/// Credentials are left to the environment. The output goes to a sibling of
/// the run's output file so the resumed rows never overwrite it.
pub fn resume_command(config: &RunConfig, range: BlockRange) -> String {
    let filters = config.template.filters();
    let mut args: Vec<String> = vec![
        "firehose-extract".into(),
        format!("-c {}", config.chain),
        format!("-p {}", shell_quote(&config.processor)),
        format!("-n {}", config.engine.max_tasks),
        format!("-i {}", shell_quote(&filters.include)),
        format!("-x {}", shell_quote(&filters.exclude)),
        format!("--endpoint {}", shell_quote(&config.channel.endpoint)),
        format!("--compression {}", config.channel.compression),
        format!("--max-message-size {}", config.channel.max_message_size),
    ];

    let condition = config.template.irreversibility_condition();
    if !condition.is_empty() {
        args.push(format!(
            "--irreversibility-condition {}",
            shell_quote(condition)
        ));
    }

    let flags = [
        (!config.channel.tls, "--plaintext"),
        (!config.check_processor_type, "--disable-signature-check"),
        (config.engine.processing_mode == ProcessingMode::Deferred, "--deferred"),
        (config.engine.failure_policy == FailurePolicy::FailFast, "--fail-fast"),
        (
            config.engine.processor_errors == ProcessorErrorPolicy::Skip,
            "--skip-processor-errors",
        ),
        (
            config.engine.connection_mode == ConnectionMode::PerWorker,
            "--connection-per-worker",
        ),
    ];
    args.extend(
        flags
            .into_iter()
            .filter(|(set, _)| *set)
            .map(|(_, flag)| flag.to_string()),
    );

    args.push(format!(
        "-o {}",
        shell_quote(&resume_output(&config.output, range).to_string_lossy())
    ));
    args.extend(config.accounts.iter().map(|account| shell_quote(account)));
    args.push(range.start().to_string());
    args.push(range.end().to_string());

    args.join(" ")
}

/// `out/run.jsonl` resumed over `[5, 9)` becomes `out/run_resume_5_to_9.jsonl`.
fn resume_output(output: &Path, range: BlockRange) -> PathBuf {
    let stem = output
        .file_stem()
        .map_or_else(|| "firehose".into(), |stem| stem.to_string_lossy());
    let name = match output.extension() {
        Some(ext) => format!(
            "{stem}_resume_{}_to_{}.{}",
            range.start(),
            range.end(),
            ext.to_string_lossy()
        ),
        None => format!("{stem}_resume_{}_to_{}", range.start(), range.end()),
    };
    output.with_file_name(name)
}

fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | ':' | '='));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

fn default_log_file() -> PathBuf {
    PathBuf::from("logs").join(format!(
        "{}.log",
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<RunConfig> {
        let cli = CliArgs::try_parse_from(
            ["firehose-extract", "--token", "t0k3n"]
                .iter()
                .chain(args),
        )?;
        RunConfig::try_from(cli)
    }

    #[test]
    fn positional_accounts_and_period() {
        let config = parse(&["alice", "bob", "100", "110"]).unwrap();

        assert_eq!(config.accounts, ["alice", "bob"]);
        assert_eq!(config.period, BlockRange::new(100, 110).unwrap());
        assert_eq!(config.chain, Chain::Eos);
        assert_eq!(config.engine.max_tasks, 20);
        assert_eq!(config.processor, "transfers");
        assert!(config.check_processor_type);
        assert_eq!(config.channel.uri(), "https://eos.firehose.eosnation.io:9000");
        assert_eq!(config.auth, AuthConfig::Static("t0k3n".into()));
        assert_eq!(
            config.output,
            Path::new("jsonl/eos_alice_bob_100_to_110.jsonl")
        );
        assert_eq!(config.logging.file, None);

        let request = config
            .template
            .build(config.period)
            .unwrap()
            .unwrap();
        assert_eq!(
            request.include_filter_expr,
            r#"receiver in ['alice', 'bob'] && action == "transfer""#
        );
    }

    #[test]
    fn options_map_to_engine_settings() {
        let config = parse(&[
            "-c", "wax", "-n", "4", "--deferred", "--fail-fast", "--skip-processor-errors",
            "--connection-per-worker", "-x", r#"action == "onblock""#, "-p", "headers",
            "--disable-signature-check", "alice", "5", "9",
        ])
        .unwrap();

        assert_eq!(config.chain, Chain::Wax);
        assert_eq!(config.engine.max_tasks, 4);
        assert_eq!(config.engine.processing_mode, ProcessingMode::Deferred);
        assert_eq!(config.engine.failure_policy, FailurePolicy::FailFast);
        assert_eq!(config.engine.processor_errors, ProcessorErrorPolicy::Skip);
        assert_eq!(config.engine.connection_mode, ConnectionMode::PerWorker);
        assert_eq!(config.processor, "headers");
        assert!(!config.check_processor_type);
        assert_eq!(config.template.filters().exclude, r#"action == "onblock""#);
        assert_eq!(config.channel.endpoint, "wax.firehose.eosnation.io:9000");
    }

    #[test]
    fn rejects_inverted_period() {
        let err = parse(&["alice", "110", "100"]).unwrap_err();
        assert!(err.to_string().contains("block_start"));
    }

    #[test]
    fn rejects_zero_tasks() {
        assert!(parse(&["-n", "0", "alice", "1", "2"]).is_err());
    }

    #[test]
    fn rejects_missing_account() {
        assert!(parse(&["100", "110"]).is_err());
    }

    #[test]
    fn rejects_non_numeric_block() {
        assert!(parse(&["alice", "bob", "110"]).is_err());
    }

    #[test]
    fn log_flag_without_path_uses_logs_dir() {
        let config = parse(&["alice", "1", "2", "-l"]).unwrap();
        let file = config.logging.file.unwrap();
        assert_eq!(file.parent(), Some(Path::new("logs")));
        assert_eq!(file.extension().and_then(|e| e.to_str()), Some("log"));

        let config = parse(&["--log=run.log", "alice", "1", "2"]).unwrap();
        assert_eq!(config.logging.file, Some(PathBuf::from("run.log")));
    }

    #[test]
    fn resume_command_replays_the_run_settings() {
        let config = parse(&[
            "-c", "wax", "-n", "4", "-p", "actions", "--deferred", "--skip-processor-errors",
            "--connection-per-worker", "--disable-signature-check", "--plaintext",
            "--endpoint", "localhost:9000", "--compression", "zstd",
            "--irreversibility-condition", "block_num > 10",
            "-i", r#"receiver == "bob's""#, "-x", r#"action == "onblock""#,
            "-o", "out/run.jsonl", "alice", "bob", "100", "200",
        ])
        .unwrap();

        let command = resume_command(&config, BlockRange::new(150, 200).unwrap());

        for expected in [
            "-c wax",
            "-p actions",
            "-n 4",
            r#"-i 'receiver == "bob'\''s"'"#,
            r#"-x 'action == "onblock"'"#,
            "--endpoint localhost:9000",
            "--compression zstd",
            "--irreversibility-condition 'block_num > 10'",
            "--plaintext",
            "--deferred",
            "--skip-processor-errors",
            "--connection-per-worker",
            "--disable-signature-check",
            "-o out/run_resume_150_to_200.jsonl",
        ] {
            assert!(command.contains(expected), "`{expected}` missing from {command}");
        }
        assert!(!command.contains("--fail-fast"));
        assert!(command.ends_with("alice bob 150 200"));
    }

    #[test]
    fn resume_command_parses_back_to_the_same_run() {
        let config = parse(&[
            "-i", r#"receiver == "alice""#, "-x", r#"action == "onblock""#, "alice", "100", "200",
        ])
        .unwrap();
        let range = BlockRange::new(120, 200).unwrap();
        let command = resume_command(&config, range);

        // Every argument of this command is either plain or a single-quoted
        // string without embedded quotes.
        let mut argv = Vec::new();
        let mut rest = command.as_str();
        while let Some(start) = rest.find(|c: char| c != ' ') {
            rest = &rest[start..];
            let (arg, tail) = match rest.strip_prefix('\'') {
                Some(quoted) => {
                    let end = quoted.find('\'').unwrap();
                    (&quoted[..end], &quoted[end + 1..])
                }
                None => rest.split_at(rest.find(' ').unwrap_or(rest.len())),
            };
            argv.push(arg.to_string());
            rest = tail;
        }

        let mut args = vec!["firehose-extract".to_string(), "--token".into(), "t0k3n".into()];
        args.extend(argv.into_iter().skip(1));
        let resumed = RunConfig::try_from(CliArgs::try_parse_from(args).unwrap()).unwrap();

        assert_eq!(resumed.period, range);
        assert_eq!(resumed.accounts, config.accounts);
        assert_eq!(resumed.template, config.template);
        assert_eq!(resumed.engine, config.engine);
        assert_eq!(resumed.channel, config.channel);
        assert_ne!(resumed.output, config.output);
    }

    #[test]
    fn plaintext_endpoint_needs_no_credentials() {
        let cli = CliArgs::try_parse_from([
            "firehose-extract",
            "--plaintext",
            "--endpoint",
            "127.0.0.1:9000",
            "alice",
            "1",
            "2",
        ])
        .unwrap();
        let config = RunConfig::try_from(cli).unwrap();
        assert_eq!(config.channel.uri(), "http://127.0.0.1:9000");
        assert!(!config.channel.tls);
    }
}
