//!
//! Line-oriented RPC shell. Reads `method arg1 arg2 …` lines, parses
//! each argument as a JSON value (bare words fall back to strings),
//! issues a `call` by name against a fixed API handle and
//! pretty-prints the reply. Formatters may be registered per method
//! name to override the default rendering.
//!

use crate::imports::*;
use std::io::Write;
use tokio::io::AsyncBufReadExt;

pub type Formatter = Arc<dyn Fn(&Variant, &[Variant]) -> String + Send + Sync>;

pub struct Cli {
    connection: Arc<ApiConnection>,
    api: ApiId,
    prompt: Mutex<String>,
    formatters: Mutex<AHashMap<String, Formatter>>,
    running: AtomicBool,
}

impl Cli {
    /// Wrap an existing connection; calls are issued against `api`
    /// (usually the bootstrap handle 0).
    pub fn new(connection: Arc<ApiConnection>, api: ApiId) -> Cli {
        Cli {
            connection,
            api,
            prompt: Mutex::new(">>>".to_string()),
            formatters: Mutex::new(AHashMap::new()),
            running: AtomicBool::new(false),
        }
    }

    pub fn set_prompt(&self, prompt: &str) {
        *self.prompt.lock().unwrap() = prompt.to_string();
    }

    /// Register a result formatter for one method. The formatter
    /// receives the reply and the arguments the call was made with.
    pub fn format_result<F>(&self, method: &str, formatter: F)
    where
        F: Fn(&Variant, &[Variant]) -> String + Send + Sync + 'static,
    {
        self.formatters
            .lock()
            .unwrap()
            .insert(method.to_string(), Arc::new(formatter));
    }

    /// Parse and execute one input line; returns the printable reply,
    /// or `None` for a blank line.
    pub async fn execute(&self, line: &str) -> RpcResult<Option<String>> {
        let mut parts = line.split_whitespace();
        let Some(method) = parts.next() else {
            return Ok(None);
        };

        let args: Vec<Variant> = parts
            .map(|token| {
                json::from_string(token, self.connection.max_depth())
                    .unwrap_or_else(|_| Variant::String(token.to_string()))
            })
            .collect();

        let result = self
            .connection
            .send_call(self.api, OpRef::Name(method.to_string()), args.clone())
            .await?;

        let formatter = self.formatters.lock().unwrap().get(method).cloned();
        let output = match formatter {
            Some(formatter) => formatter(&result, &args),
            None => json::to_pretty_string(&result, self.connection.max_depth())?,
        };
        Ok(Some(output))
    }

    /// Read-eval-print loop over stdin. Terminates on EOF, `quit` or
    /// `exit`, or after [`Cli::stop`].
    pub async fn run(&self) -> RpcResult<()> {
        self.running.store(true, Ordering::SeqCst);
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        let mut lines = stdin.lines();

        while self.running.load(Ordering::SeqCst) {
            {
                let prompt = self.prompt.lock().unwrap();
                print!("{prompt} ");
            }
            let _ = std::io::stdout().flush();

            let line = lines
                .next_line()
                .await
                .map_err(|err| RpcError::transport(err.to_string()))?;
            let Some(line) = line else { break };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line == "quit" || line == "exit" {
                break;
            }

            match self.execute(line).await {
                Ok(Some(output)) => println!("{output}"),
                Ok(None) => {}
                Err(err) => log_error!("{}", err),
            }
        }

        Ok(())
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
