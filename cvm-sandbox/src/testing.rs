//! Deterministic in-process engine for exercising the sandbox without V8.
//!
//! Scripts are one command per line:
//!
//! | command | effect |
//! |---|---|
//! | `gas N` | charge `N` gas through the host meter |
//! | `value TEXT` | result is the primitive `TEXT` |
//! | `json TEXT` | result is an object serializing to `TEXT` |
//! | `unserializable` | result is an object that cannot be serialized |
//! | `empty` | result is `undefined` |
//! | `throw MESSAGE` | raise an exception |
//! | `spin` | loop until interrupted |
//! | `sleep MS` | block for `MS` milliseconds, ignoring interrupts |
//! | `slowgas MS N` | a native charge of `N` gas that takes `MS` milliseconds |
//! | `log MESSAGE` | call the host log capability |
//! | `require NAME` | load a module; its value becomes the result |
//! | `call NAME [JSON args]` | call a host function; its JSON result becomes the result |
//!
//! A contract is a list of `api NAME` sections. Calling an API runs the
//! lines of its section, with `$0`, `$1`, ... replaced by the JSON text of
//! the call's arguments.
//!
//! Any other command is a compile error. Every line is a safe point where a
//! pending interrupt stops the run. `instrument` prepends `gas 1` to every
//! command, standing in for real gas injection.

use crate::engine::{Engine, Exception, Interrupt, SourceLocation, ValueKind};
use crate::host::HostContext;
use crate::resolver::ModuleSource;
use crate::Result;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Value produced by a scripted run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedValue {
    Empty,
    Primitive(String),
    Object(Option<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Gas(u64),
    Value(String),
    Json(String),
    Unserializable,
    Empty,
    Throw(String),
    Spin,
    Sleep(u64),
    SlowGas(u64, u64),
    Log(String),
    Require(String),
    Call(String, Vec<serde_json::Value>),
}

/// A compiled scripted program
#[derive(Debug, Clone)]
pub struct ScriptedProgram {
    name: String,
    lines: Vec<(usize, String, Command)>,
}

#[derive(Debug, Default)]
struct InterruptFlag(AtomicBool);

impl Interrupt for InterruptFlag {
    fn interrupt(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// See the module documentation for the command language.
#[derive(Debug, Default)]
pub struct ScriptedEngine {
    host: Option<Arc<HostContext>>,
    interrupted: Arc<InterruptFlag>,
    dropped: Arc<AtomicBool>,
    runs: Arc<AtomicUsize>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag set when the engine is dropped
    pub fn dropped_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.dropped)
    }

    /// Counter of started runs
    pub fn run_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.runs)
    }

    fn host(&self) -> std::result::Result<&Arc<HostContext>, Exception> {
        self.host
            .as_ref()
            .ok_or_else(|| Exception::thrown("Error: host capabilities not installed"))
    }

    fn parse(line_no: usize, line: &str, name: &str) -> std::result::Result<Command, Exception> {
        let (word, rest) = match line.split_once(' ') {
            Some((word, rest)) => (word, rest.trim().to_string()),
            None => (line, String::new()),
        };

        let number = |rest: &str| {
            rest.parse::<u64>().map_err(|_| {
                syntax_error(name, line_no, line, format!("expected a number, got '{rest}'"))
            })
        };

        Ok(match word {
            "gas" => Command::Gas(number(&rest)?),
            "value" => Command::Value(rest),
            "json" => Command::Json(rest),
            "unserializable" => Command::Unserializable,
            "empty" => Command::Empty,
            "throw" => Command::Throw(rest),
            "spin" => Command::Spin,
            "sleep" => Command::Sleep(number(&rest)?),
            "slowgas" => {
                let (millis, amount) = rest.split_once(' ').ok_or_else(|| {
                    syntax_error(name, line_no, line, "expected 'slowgas MS N'".to_string())
                })?;
                Command::SlowGas(number(millis.trim())?, number(amount.trim())?)
            }
            "log" => Command::Log(rest),
            "require" => Command::Require(rest),
            "call" => {
                let (function, args) = match rest.split_once(' ') {
                    Some((function, args)) => {
                        let args = serde_json::from_str(args).map_err(|e| {
                            syntax_error(name, line_no, line, format!("bad arguments: {e}"))
                        })?;
                        (function.to_string(), args)
                    }
                    None => (rest, Vec::new()),
                };
                Command::Call(function, args)
            }
            other => {
                return Err(syntax_error(
                    name,
                    line_no,
                    line,
                    format!("Unexpected identifier '{other}'"),
                ))
            }
        })
    }

    fn check_interrupt(&self) -> std::result::Result<(), Exception> {
        if self.interrupted.0.load(Ordering::SeqCst) {
            return Err(Exception::terminated());
        }
        Ok(())
    }

    fn thrown_at(program: &ScriptedProgram, line_no: usize, line: &str, text: String) -> Exception {
        Exception::thrown(text.clone())
            .with_location(SourceLocation {
                resource: program.name.clone(),
                line: Some(line_no),
                start_column: Some(0),
                end_column: Some(line.len()),
                source_line: Some(line.to_string()),
            })
            .with_stack(format!("{text}\n    at {}:{line_no}:1", program.name))
    }

    fn require(&mut self, module: &str) -> std::result::Result<ScriptedValue, String> {
        let host = Arc::clone(self.host().map_err(|e| e.text)?);
        match host.modules().resolve(module).map_err(|e| e.to_string())? {
            ModuleSource::Local(source) => Ok(ScriptedValue::Primitive(source)),
            ModuleSource::Fallback(source) => {
                let instrumented = self.instrument(&source).map_err(|e| e.text)?;
                let program = self.compile(&instrumented, module).map_err(|e| e.text)?;
                self.execute(&program).map_err(|e| e.text)
            }
        }
    }

    fn execute(&mut self, program: &ScriptedProgram) -> std::result::Result<ScriptedValue, Exception> {
        let mut result = ScriptedValue::Empty;

        for (line_no, line, command) in &program.lines {
            self.check_interrupt()?;

            match command {
                Command::Gas(amount) => self.host()?.gas().charge(*amount),
                Command::Value(text) => result = ScriptedValue::Primitive(text.clone()),
                Command::Json(text) => result = ScriptedValue::Object(Some(text.clone())),
                Command::Unserializable => result = ScriptedValue::Object(None),
                Command::Empty => result = ScriptedValue::Empty,
                Command::Throw(message) => {
                    return Err(Self::thrown_at(
                        program,
                        *line_no,
                        line,
                        format!("Error: {message}"),
                    ))
                }
                Command::Spin => loop {
                    self.check_interrupt()?;
                    std::thread::sleep(Duration::from_micros(50));
                },
                Command::Sleep(ms) => block_for(*ms),
                Command::SlowGas(ms, amount) => {
                    block_for(*ms);
                    self.host()?.gas().charge(*amount);
                }
                Command::Log(message) => {
                    self.host()?
                        .log(Some(message))
                        .map_err(|e| Self::thrown_at(program, *line_no, line, e.to_string()))?;
                }
                Command::Require(module) => {
                    result = self.require(module).map_err(|text| {
                        Self::thrown_at(program, *line_no, line, format!("Error: {text}"))
                    })?;
                }
                Command::Call(function, args) => {
                    let value = self
                        .host()?
                        .call_function(function, args)
                        .map_err(|text| {
                            Self::thrown_at(program, *line_no, line, format!("Error: {text}"))
                        })?;
                    result = ScriptedValue::Object(Some(value.to_string()));
                }
            }
        }

        Ok(result)
    }
}

fn block_for(millis: u64) {
    let until = Instant::now() + Duration::from_millis(millis);
    while Instant::now() < until {
        std::thread::sleep(Duration::from_micros(200));
    }
}

fn syntax_error(name: &str, line_no: usize, line: &str, message: String) -> Exception {
    Exception::thrown(format!("SyntaxError: {message}")).with_location(SourceLocation {
        resource: name.to_string(),
        line: Some(line_no),
        start_column: Some(0),
        end_column: Some(line.len()),
        source_line: Some(line.to_string()),
    })
}

impl Engine for ScriptedEngine {
    type Script = ScriptedProgram;
    type Value = ScriptedValue;

    fn install(&mut self, host: Arc<HostContext>) -> Result<()> {
        self.host = Some(host);
        Ok(())
    }

    fn compile(&mut self, source: &str, name: &str) -> std::result::Result<ScriptedProgram, Exception> {
        let mut lines = Vec::new();
        for (index, line) in source.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with("//") {
                continue;
            }
            let command = Self::parse(index + 1, line, name)?;
            lines.push((index + 1, line.to_string(), command));
        }

        Ok(ScriptedProgram {
            name: name.to_string(),
            lines,
        })
    }

    fn run(&mut self, script: ScriptedProgram) -> std::result::Result<ScriptedValue, Exception> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.execute(&script)
    }

    fn classify(&self, value: &ScriptedValue) -> ValueKind {
        match value {
            ScriptedValue::Empty => ValueKind::Empty,
            ScriptedValue::Primitive(_) => ValueKind::Primitive,
            ScriptedValue::Object(_) => ValueKind::Object,
        }
    }

    fn display(&mut self, value: &ScriptedValue) -> String {
        match value {
            ScriptedValue::Primitive(text) => text.clone(),
            ScriptedValue::Empty => "undefined".to_string(),
            ScriptedValue::Object(_) => "[object Object]".to_string(),
        }
    }

    fn stringify(&mut self, value: &ScriptedValue) -> Option<String> {
        match value {
            ScriptedValue::Object(json) => json.clone(),
            _ => None,
        }
    }

    fn instrument(&mut self, source: &str) -> std::result::Result<String, Exception> {
        let mut out = String::new();
        for line in source.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with("//") {
                continue;
            }
            out.push_str("gas 1\n");
            out.push_str(trimmed);
            out.push('\n');
        }
        Ok(out)
    }

    fn interrupter(&self) -> Arc<dyn Interrupt> {
        self.interrupted.clone()
    }

    fn prepare(code: &str, api: &str, args: &[serde_json::Value]) -> String {
        let mut body = Vec::new();
        let mut found = false;
        let mut selected = false;

        for line in code.lines().map(str::trim) {
            if let Some(name) = line.strip_prefix("api ") {
                selected = name.trim() == api;
                found |= selected;
            } else if selected {
                let mut line = line.to_string();
                // Highest index first so `$1` never eats the prefix of `$10`
                for (index, arg) in args.iter().enumerate().rev() {
                    line = line.replace(&format!("${index}"), &arg.to_string());
                }
                body.push(line);
            }
        }

        if !found {
            return format!("throw contract has no api '{api}'");
        }
        body.join("\n")
    }

    fn clear_interrupt(&mut self) {
        self.interrupted.0.store(false, Ordering::SeqCst);
    }
}

impl Drop for ScriptedEngine {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}
