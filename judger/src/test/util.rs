//! A scriptable interpreter standing in for a real one in tests.

use std::{
    borrow::Cow,
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::sandbox::model::{Interpreter, InterpreterLoader, OutputCapture};

/// Snippets of the tiny language understood by [`MockInterpreter`].
pub struct MockScript;

impl MockScript {
    pub fn print(s: &str) -> String {
        format!("print(\"{}\")", s)
    }

    pub fn sleep_ms(ms: u64) -> String {
        format!("time.sleep({})", ms as f64 / 1000.0)
    }

    pub fn raise(kind: &str, msg: &str) -> String {
        format!("raise {}(\"{}\")", kind, msg)
    }
}

#[derive(Debug, Clone)]
pub struct MockResult {
    stdout: String,
    stderr: String,
    error: Option<String>,
    delay: Duration,
}

pub struct MockResultBuilder<'a> {
    owner: &'a mut MockInterpreter,
    code: String,
    res: MockResult,
}

impl<'a> MockResultBuilder<'a> {
    pub fn stdout(mut self, s: impl Into<String>) -> Self {
        self.res.stdout = s.into();
        self
    }

    pub fn stderr(mut self, s: impl Into<String>) -> Self {
        self.res.stderr = s.into();
        self
    }

    pub fn raises(mut self, msg: impl Into<String>) -> Self {
        self.res.error = Some(msg.into());
        self
    }

    pub fn takes(mut self, delay: Duration) -> Self {
        self.res.delay = delay;
        self
    }

    pub fn finish(self) {
        self.owner.rules.insert(self.code, self.res);
    }
}

/// An interpreter that either replays canned results for exact pieces of code,
/// or walks the code line by line understanding `print("...")`,
/// `time.sleep(secs)` and `raise Kind("...")`. Anything else is ignored.
#[derive(Debug, Default)]
pub struct MockInterpreter {
    rules: HashMap<String, MockResult>,
    runs: Arc<AtomicUsize>,
    shutdowns: Arc<AtomicUsize>,
}

impl MockInterpreter {
    pub fn new() -> MockInterpreter {
        Default::default()
    }

    pub fn when(&mut self, code: impl Into<String>) -> MockResultBuilder<'_> {
        MockResultBuilder {
            owner: self,
            code: code.into(),
            res: MockResult {
                stdout: String::new(),
                stderr: String::new(),
                error: None,
                delay: Duration::ZERO,
            },
        }
    }

    pub fn run_count(&self) -> Arc<AtomicUsize> {
        self.runs.clone()
    }

    pub fn shutdown_count(&self) -> Arc<AtomicUsize> {
        self.shutdowns.clone()
    }

    async fn interpret(&self, code: &str, capture: &mut OutputCapture) -> anyhow::Result<()> {
        for line in code.lines().map(str::trim) {
            if let Some(arg) = call_arg(line, "print(") {
                capture.stdout.write(unquote(arg));
                capture.stdout.write("\n");
            } else if let Some(arg) = call_arg(line, "time.sleep(") {
                let secs: f64 = arg.parse()?;
                tokio::time::sleep(Duration::from_secs_f64(secs)).await;
            } else if let Some(rest) = line.strip_prefix("raise") {
                let rest = rest.trim();
                if rest.is_empty() {
                    anyhow::bail!("RuntimeError: No active exception to reraise");
                }
                match rest.split_once('(') {
                    Some((kind, arg)) => {
                        let msg = unquote(arg.trim_end_matches(')'));
                        anyhow::bail!("{}: {}", kind, msg)
                    }
                    None => anyhow::bail!("{}", rest),
                }
            }
        }
        Ok(())
    }
}

fn call_arg<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    line.strip_prefix(prefix)?.strip_suffix(')')
}

fn unquote(s: &str) -> &str {
    s.trim_matches(|c| c == '"' || c == '\'')
}

#[async_trait]
impl Interpreter for MockInterpreter {
    fn name(&self) -> Cow<'static, str> {
        "mock".into()
    }

    async fn run(&self, code: &str, capture: &mut OutputCapture) -> anyhow::Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let res = match self.rules.get(code) {
            Some(res) => res,
            None => return self.interpret(code, capture).await,
        };
        capture.stdout.write(&res.stdout);
        capture.stderr.write(&res.stderr);
        tokio::time::sleep(res.delay).await;
        match &res.error {
            Some(msg) => Err(anyhow::anyhow!("{}", msg)),
            None => Ok(()),
        }
    }

    async fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out one shared [`MockInterpreter`], optionally after a delay or not
/// at all.
pub struct MockLoader {
    interpreter: Arc<MockInterpreter>,
    error: Option<String>,
    delay: Duration,
    loads: Arc<AtomicUsize>,
}

impl MockLoader {
    pub fn new() -> MockLoader {
        Self::with_interpreter(MockInterpreter::new())
    }

    pub fn with_interpreter(interpreter: MockInterpreter) -> MockLoader {
        MockLoader {
            interpreter: Arc::new(interpreter),
            error: None,
            delay: Duration::ZERO,
            loads: Default::default(),
        }
    }

    pub fn failing(msg: impl Into<String>) -> MockLoader {
        MockLoader {
            error: Some(msg.into()),
            ..Self::new()
        }
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn load_count(&self) -> Arc<AtomicUsize> {
        self.loads.clone()
    }

    pub fn interpreter(&self) -> &MockInterpreter {
        &self.interpreter
    }
}

#[async_trait]
impl InterpreterLoader for MockLoader {
    async fn load(&self) -> anyhow::Result<Arc<dyn Interpreter>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        match &self.error {
            Some(msg) => Err(anyhow::anyhow!("{}", msg)),
            None => Ok(self.interpreter.clone()),
        }
    }
}
