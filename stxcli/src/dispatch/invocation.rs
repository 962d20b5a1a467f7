//! Structured CLI invocations and their rendering to a shell line.

use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

use indexmap::IndexMap;

/// How a multi-valued flag is written out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinPolicy {
    /// `--flag v1 --flag v2`
    Repeat,

    /// `--flag v1<sep>v2`
    Join(String),
}

impl JoinPolicy {
    /// `--flag v1,v2`
    pub fn comma() -> Self {
        JoinPolicy::Join(",".to_string())
    }
}

/// The value of one flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlagValue {
    /// Flag is not emitted.
    Absent,

    /// `true` emits the bare flag, `false` omits it.
    Bool(bool),

    Scalar(String),

    List(Vec<String>, JoinPolicy),

    /// Property bag, emitted as `key=value` items.
    Map(IndexMap<String, String>, JoinPolicy),
}

impl From<&str> for FlagValue {
    fn from(value: &str) -> Self {
        FlagValue::Scalar(value.to_string())
    }
}

impl From<String> for FlagValue {
    fn from(value: String) -> Self {
        FlagValue::Scalar(value)
    }
}

impl From<&String> for FlagValue {
    fn from(value: &String) -> Self {
        FlagValue::Scalar(value.clone())
    }
}

impl From<bool> for FlagValue {
    fn from(value: bool) -> Self {
        FlagValue::Bool(value)
    }
}

macro_rules! scalar_from_number {
    ($($t:ty),*) => {
        $(
            impl From<$t> for FlagValue {
                fn from(value: $t) -> Self {
                    FlagValue::Scalar(value.to_string())
                }
            }
        )*
    };
}

scalar_from_number!(i32, i64, u16, u32, u64, usize);

impl<T: Into<FlagValue>> From<Option<T>> for FlagValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(FlagValue::Absent, Into::into)
    }
}

/// Retry hook for invocations.
///
/// A failed attempt (non-zero exit) is retried after `check_interval`, as
/// long as the sleep still ends before the invocation's timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub retries: u32,

    pub check_interval: Duration,
}

impl RetryPolicy {
    /// Run once; fail on the first non-zero exit.
    pub const NONE: RetryPolicy = RetryPolicy {
        retries: 0,
        check_interval: Duration::ZERO,
    };

    pub fn new(retries: u32, check_interval: Duration) -> Self {
        Self {
            retries,
            check_interval,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::NONE
    }
}

/// One CLI command to run: `tool subcommand [flags...] [positional...]`.
///
/// Built with [`Invocation::builder`]; immutable afterwards.
///
/// # Example
///
/// ```
/// use std::time::Duration;
///
/// use stxcli::dispatch::Invocation;
///
/// let inv = Invocation::builder("system", "application-upload", Duration::from_secs(60))
///     .flag("--app-name", "hello-kitty")
///     .flag("--app-version", Some("1.0"))
///     .flag("--local", false)
///     .arg("/home/sysadmin/hello-kitty.tgz")
///     .credentials("admin")
///     .build();
/// assert_eq!(
///     inv.to_line(),
///     "system application-upload --app-name hello-kitty --app-version 1.0 /home/sysadmin/hello-kitty.tgz"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    tool: String,
    subcommand: Vec<String>,
    flags: IndexMap<String, FlagValue>,
    positional: Vec<String>,
    credentials: Option<String>,
    sudo: bool,
    timeout: Duration,
    expect_nonzero_ok: bool,
    retry: RetryPolicy,
}

impl Invocation {
    /// Start an invocation. `subcommand` may be empty or hold several
    /// words (`"get pods"`). `timeout` is the overall budget, retries
    /// included.
    pub fn builder(tool: impl Into<String>, subcommand: &str, timeout: Duration) -> InvocationBuilder {
        InvocationBuilder::new(tool, subcommand, timeout)
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    pub fn flags(&self) -> &IndexMap<String, FlagValue> {
        &self.flags
    }

    pub fn positional(&self) -> &[String] {
        &self.positional
    }

    /// Credential profile to source before the command.
    pub fn credentials(&self) -> Option<&str> {
        self.credentials.as_deref()
    }

    pub fn sudo(&self) -> bool {
        self.sudo
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn expect_nonzero_ok(&self) -> bool {
        self.expect_nonzero_ok
    }

    pub fn retry(&self) -> RetryPolicy {
        self.retry
    }

    /// The command's words before shell quoting.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = vec![self.tool.clone()];
        argv.extend(self.subcommand.iter().cloned());

        for (name, value) in &self.flags {
            match value {
                FlagValue::Absent | FlagValue::Bool(false) => {}
                FlagValue::Bool(true) => argv.push(name.clone()),
                FlagValue::Scalar(v) => {
                    argv.push(name.clone());
                    argv.push(v.clone());
                }
                FlagValue::List(items, policy) => emit_items(&mut argv, name, items.iter().cloned(), policy),
                FlagValue::Map(props, policy) => {
                    let items = props.iter().map(|(k, v)| format!("{k}={v}"));
                    emit_items(&mut argv, name, items, policy);
                }
            }
        }

        argv.extend(self.positional.iter().cloned());
        argv
    }

    /// The shell line, words quoted where the shell would split or expand
    /// them. Credentials and sudo are applied by the dispatcher.
    pub fn to_line(&self) -> String {
        self.argv()
            .iter()
            .map(|w| quote_word(w))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_line())
    }
}

fn emit_items(
    argv: &mut Vec<String>,
    name: &str,
    items: impl Iterator<Item = String>,
    policy: &JoinPolicy,
) {
    match policy {
        JoinPolicy::Repeat => {
            for item in items {
                argv.push(name.to_string());
                argv.push(item);
            }
        }
        JoinPolicy::Join(sep) => {
            let joined = items.collect::<Vec<_>>().join(sep);
            if !joined.is_empty() {
                argv.push(name.to_string());
                argv.push(joined);
            }
        }
    }
}

/// Leave plain words (including `k=v` and `a,b`) bare; quote the rest.
pub(crate) fn quote_word(word: &str) -> Cow<'_, str> {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || ",._+:@%/=-".contains(c));
    if plain {
        Cow::Borrowed(word)
    } else {
        shell_words::quote(word)
    }
}

/// Builder for [`Invocation`].
#[derive(Debug, Clone)]
pub struct InvocationBuilder {
    inner: Invocation,
}

impl InvocationBuilder {
    pub fn new(tool: impl Into<String>, subcommand: &str, timeout: Duration) -> Self {
        Self {
            inner: Invocation {
                tool: tool.into(),
                subcommand: subcommand.split_whitespace().map(str::to_string).collect(),
                flags: IndexMap::new(),
                positional: Vec::new(),
                credentials: None,
                sudo: false,
                timeout,
                expect_nonzero_ok: false,
                retry: RetryPolicy::NONE,
            },
        }
    }

    /// Set a flag. Names without a leading dash get `--`.
    pub fn flag(mut self, name: &str, value: impl Into<FlagValue>) -> Self {
        self.inner.flags.insert(flag_name(name), value.into());
        self
    }

    pub fn list<I, S>(self, name: &str, items: I, policy: JoinPolicy) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let items = items.into_iter().map(Into::into).collect();
        self.flag(name, FlagValue::List(items, policy))
    }

    pub fn props<I, K, V>(self, name: &str, props: I, policy: JoinPolicy) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let props = props.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self.flag(name, FlagValue::Map(props, policy))
    }

    /// Append a positional argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.inner.positional.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner.positional.extend(args.into_iter().map(Into::into));
        self
    }

    /// Source credential profile `profile` before running.
    pub fn credentials(mut self, profile: impl Into<String>) -> Self {
        self.inner.credentials = Some(profile.into());
        self
    }

    /// Run through `sudo`.
    pub fn sudo(mut self, sudo: bool) -> Self {
        self.inner.sudo = sudo;
        self
    }

    /// Return non-zero exits instead of failing.
    pub fn expect_nonzero_ok(mut self, ok: bool) -> Self {
        self.inner.expect_nonzero_ok = ok;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.inner.retry = policy;
        self
    }

    pub fn build(self) -> Invocation {
        self.inner
    }
}

fn flag_name(name: &str) -> String {
    if name.starts_with('-') {
        name.to_string()
    } else {
        format!("--{name}")
    }
}
