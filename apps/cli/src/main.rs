//! LogicLoom CLI - 交互式查询终端

use std::io::{self, BufRead, Write};
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ll_pengine::Reply;
use ll_wire::PengineClient;

#[derive(Parser, Debug)]
#[command(name = "ll")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 守护进程地址
    #[arg(long, env = "LL_SERVER", default_value = "http://127.0.0.1:8765")]
    server: String,

    /// 初始 Actor 名称
    #[arg(long, default_value = "user")]
    actor: String,

    /// 每次返回的解数量
    #[arg(long)]
    chunk: Option<usize>,

    /// 请求超时 (秒)
    #[arg(long, default_value_t = 30)]
    timeout: u64,
}

/// 一行输入
#[derive(Debug, PartialEq)]
enum Command {
    Ask(String),
    Next,
    Stop,
    Destroy,
    Consult(String),
    Actor(Option<String>),
    Chunk(Option<usize>),
    Dump,
    Help,
    Quit,
    Empty,
    Invalid(String),
}

fn parse_command(line: &str) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    if line == ";" {
        return Command::Next;
    }
    let Some(rest) = line.strip_prefix(':') else {
        let goal = line.strip_suffix('.').unwrap_or(line).trim_end();
        return Command::Ask(goal.to_string());
    };
    let mut parts = rest.splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or_default();
    let arg = parts.next().map(str::trim).filter(|a| !a.is_empty());
    match (name, arg) {
        ("next" | "n", None) => Command::Next,
        ("stop", None) => Command::Stop,
        ("destroy", None) => Command::Destroy,
        ("consult" | "c", Some(path)) => Command::Consult(path.to_string()),
        ("actor", arg) => Command::Actor(arg.map(str::to_string)),
        ("chunk", None) => Command::Chunk(None),
        ("chunk", Some(n)) => match n.parse::<usize>() {
            Ok(n) if n > 0 => Command::Chunk(Some(n)),
            _ => Command::Invalid(format!("chunk must be a positive integer: {n}")),
        },
        ("dump", None) => Command::Dump,
        ("help" | "h", None) => Command::Help,
        ("quit" | "q" | "exit", None) => Command::Quit,
        _ => Command::Invalid(format!("Unknown command: {line}")),
    }
}

/// 终端会话状态
struct Shell {
    client: PengineClient,
    actor: String,
    chunk: Option<usize>,
    /// 最近一次仍有更多解的查询
    pending: Option<String>,
}

impl Shell {
    async fn run(&mut self, command: Command) -> anyhow::Result<bool> {
        match command {
            Command::Empty => {}
            Command::Help => print_help(),
            Command::Quit => return Ok(false),
            Command::Invalid(message) => {
                println!("{message}");
                println!("Type ':help' for available commands.");
            }
            Command::Ask(goal) => {
                let reply = self.client.ask(&self.actor, &goal, self.chunk).await?;
                self.show(reply);
            }
            Command::Next => match self.pending.clone() {
                Some(id) => {
                    let reply = self.client.next(&self.actor, &id, self.chunk).await?;
                    self.show(reply);
                }
                None => println!("No open query."),
            },
            Command::Stop => {
                let reply = self.client.stop(&self.actor, self.pending.take()).await?;
                self.show(reply);
            }
            Command::Destroy => {
                self.pending = None;
                let reply = self.client.destroy(&self.actor, None).await?;
                self.show(reply);
            }
            Command::Consult(path) => {
                let text = tokio::fs::read_to_string(&path).await?;
                let reply = self.client.consult(&self.actor, &text).await?;
                self.show(reply);
            }
            Command::Actor(Some(name)) => {
                self.actor = name;
                self.pending = None;
                let reply = self.client.create(&self.actor).await?;
                if let Some(meta) = reply.meta {
                    println!(
                        "actor {} (txid {}, modules: {})",
                        self.actor,
                        meta.txid,
                        meta.modules.join(", ")
                    );
                }
            }
            Command::Actor(None) => println!("actor {}", self.actor),
            Command::Chunk(chunk) => {
                self.chunk = chunk;
                match chunk {
                    Some(n) => println!("chunk {n}"),
                    None => println!("chunk unlimited"),
                }
            }
            Command::Dump => print!("{}", self.client.dump(&self.actor).await?),
        }
        Ok(true)
    }

    fn show(&mut self, reply: Reply) {
        self.pending = (reply.more == Some(true)).then(|| reply.id.clone());
        print!("{}", reply.to_text());
    }
}

fn print_help() {
    println!("Available commands:");
    println!("  <goal>            - Run a query, e.g. member(X, [a, b])");
    println!("  ; | :next         - Fetch more solutions of the open query");
    println!("  :stop             - Stop the open query");
    println!("  :destroy          - Discard all queries of the actor");
    println!("  :consult <file>   - Load a source file into the actor");
    println!("  :actor [name]     - Show or switch the current actor");
    println!("  :chunk [n]        - Set the number of solutions per reply");
    println!("  :dump             - Print the actor's program");
    println!("  :help             - Show this help message");
    println!("  :quit             - Exit the CLI");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // 初始化日志
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "logicloom_cli=warn,ll_wire=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let client = PengineClient::new(&args.server, Duration::from_secs(args.timeout))?;
    if !client.health().await {
        tracing::warn!(server = %args.server, "Daemon is not reachable");
    }

    println!("LogicLoom CLI v{}", env!("CARGO_PKG_VERSION"));
    println!("Connected to {} as actor '{}'.", client.base(), args.actor);
    println!("Type ':help' for available commands, ':quit' to exit.");
    println!();

    let mut shell = Shell {
        client,
        actor: args.actor,
        chunk: args.chunk,
        pending: None,
    };
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("{}?- ", shell.actor);
        stdout.flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input)? == 0 {
            break;
        }
        match shell.run(parse_command(&input)).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => println!("ERROR: {e}"),
        }
    }

    println!("Goodbye!");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_goals_and_commands() {
        assert_eq!(parse_command("  "), Command::Empty);
        assert_eq!(
            parse_command("member(X, [a, b])."),
            Command::Ask("member(X, [a, b])".into())
        );
        assert_eq!(parse_command(";"), Command::Next);
        assert_eq!(parse_command(":n"), Command::Next);
        assert_eq!(parse_command(":consult rules.pl"), Command::Consult("rules.pl".into()));
        assert_eq!(parse_command(":actor"), Command::Actor(None));
        assert_eq!(parse_command(":actor bob"), Command::Actor(Some("bob".into())));
        assert_eq!(parse_command(":chunk 5"), Command::Chunk(Some(5)));
        assert_eq!(parse_command(":chunk"), Command::Chunk(None));
        assert_eq!(parse_command(":q"), Command::Quit);
    }

    #[test]
    fn test_invalid_commands() {
        assert!(matches!(parse_command(":chunk 0"), Command::Invalid(_)));
        assert!(matches!(parse_command(":consult"), Command::Invalid(_)));
        assert!(matches!(parse_command(":frobnicate"), Command::Invalid(_)));
    }
}
