//! Remote command lines.
//!
//! `ctr container create` only accepts the container command and its
//! arguments positionally, right after the container name and before any
//! flag. `CommandLine` encodes that: it starts in the [`Positional`] stage,
//! can move once into the [`Flags`] stage, and never back.

use std::borrow::Cow;
use std::marker::PhantomData;

/// Stage where positional tokens may still be appended.
#[derive(Debug, Clone)]
pub struct Positional;

/// Stage where only flags may be appended.
#[derive(Debug, Clone)]
pub struct Flags;

#[derive(Debug, Clone)]
pub struct CommandLine<Stage = Positional> {
    program: String,
    positionals: Vec<String>,
    flags: Vec<String>,
    _stage: PhantomData<Stage>,
}

impl CommandLine<Positional> {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            positionals: Vec::new(),
            flags: Vec::new(),
            _stage: PhantomData,
        }
    }

    pub fn arg(mut self, token: impl Into<String>) -> Self {
        self.positionals.push(token.into());
        self
    }

    pub fn args<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.positionals.extend(tokens.into_iter().map(Into::into));
        self
    }

    /// Close the positional section. Only flags can follow.
    pub fn flags(self) -> CommandLine<Flags> {
        CommandLine {
            program: self.program,
            positionals: self.positionals,
            flags: self.flags,
            _stage: PhantomData,
        }
    }
}

impl CommandLine<Flags> {
    /// A bare switch such as `--net-host`.
    pub fn switch(mut self, flag: impl Into<String>) -> Self {
        self.flags.push(flag.into());
        self
    }

    /// `flag value` as two tokens, e.g. `--env A=1`.
    pub fn option(mut self, flag: impl Into<String>, value: impl Into<String>) -> Self {
        self.flags.push(flag.into());
        self.flags.push(value.into());
        self
    }

    /// `flag=value` as one token, e.g. `--mount=type=bind,...`.
    pub fn assign(mut self, flag: &str, value: &str) -> Self {
        self.flags.push(format!("{}={}", flag, value));
        self
    }
}

impl<Stage> CommandLine<Stage> {
    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn positionals(&self) -> &[String] {
        &self.positionals
    }

    pub fn flag_tokens(&self) -> &[String] {
        &self.flags
    }

    /// All tokens in order: program, positionals, flags.
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.program.as_str())
            .chain(self.positionals.iter().map(String::as_str))
            .chain(self.flags.iter().map(String::as_str))
    }

    /// Render for a remote shell, quoting tokens that need it.
    pub fn render(&self) -> String {
        self.tokens().map(quote).collect::<Vec<_>>().join(" ")
    }
}

fn quote(token: &str) -> Cow<'_, str> {
    // `=` and `,` are safe in argument position; keep `--env A=1` readable.
    let plain = !token.is_empty()
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"-_./:=,@+%".contains(&b));
    if plain {
        return Cow::Borrowed(token);
    }
    // try_quote only rejects NUL bytes, which cannot reach a remote shell anyway.
    shlex::try_quote(token).unwrap_or_else(|_| Cow::Owned(token.replace('\0', "")))
}
