//! Command routing.
//!
//! Commands are a special case of hooks: each one is bound to the
//! message-delivery topics and wrapped in a gate that checks, in order,
//!
//! 1. the required conversational-context tag for this (connection, target),
//! 2. the caller's permissions against the ACL,
//! 3. the mention requirement (input addressed to the bot by name),
//! 4. the command pattern itself, anchored over the full remaining input.
//!
//! Any gate failing skips the command silently — the event is not consumed
//! and no reply reveals which gate failed. On a match, named capture groups
//! become keyword arguments (optionally coerced) and the handler runs.

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use serde_json::{Map, Number, Value};
use tracing::{debug, error};

use ingot_core::{Outcome, topics};

use crate::context::Context;
use crate::error::BuildError;
use crate::service::{CommandFn, HookFn};

/// Argument coercion applied to a named capture group before the handler
/// sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coerce {
    /// Keep the captured text as-is.
    Str,
    /// Parse as a signed integer.
    Int,
    /// Parse as a float.
    Float,
    /// Parse `true`/`false` (case-insensitive).
    Bool,
}

impl Coerce {
    fn apply(self, raw: &str) -> Result<Value, String> {
        match self {
            Coerce::Str => Ok(Value::String(raw.to_string())),
            Coerce::Int => raw
                .parse::<i64>()
                .map(|n| Value::Number(n.into()))
                .map_err(|e| format!("'{raw}' is not an integer: {e}")),
            Coerce::Float => raw
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| format!("'{raw}' is not a number")),
            Coerce::Bool => match raw.to_ascii_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(format!("'{raw}' is not a boolean")),
            },
        }
    }
}

/// Builder for one command registration.
pub struct Command {
    pattern: String,
    mention: bool,
    context_tag: Option<String>,
    permissions: Vec<String>,
    background: bool,
    eat: bool,
    priority: i32,
    coercions: HashMap<String, Coerce>,
    handler: Option<CommandFn>,
}

impl Command {
    /// Starts a command for `pattern`.
    ///
    /// The pattern is matched against the whole (mention-stripped) input:
    /// it is compiled anchored at both ends.
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            mention: false,
            context_tag: None,
            permissions: Vec::new(),
            background: false,
            eat: true,
            priority: 0,
            coercions: HashMap::new(),
            handler: None,
        }
    }

    /// Requires the input to address the bot by name (`nick: ...`).
    ///
    /// Private messages are inherently addressed to the bot, so the
    /// requirement is waived there.
    pub fn mention(mut self, mention: bool) -> Self {
        self.mention = mention;
        self
    }

    /// Requires a conversational-context tag to be active for the
    /// (connection, target) pair, e.g. an ongoing game.
    pub fn context(mut self, tag: impl Into<String>) -> Self {
        self.context_tag = Some(tag.into());
        self
    }

    /// Requires the caller's hostmask to hold `permission`.
    ///
    /// May be called multiple times; all listed permissions are required.
    pub fn permission(mut self, permission: impl Into<String>) -> Self {
        self.permissions.push(permission.into());
        self
    }

    /// Runs the handler off the dispatch unit as an independent spawned task.
    ///
    /// Background handlers must not touch engine-owned state directly; they
    /// post resumptions via [`Engine::submit`](crate::Engine::submit) instead.
    pub fn background(mut self, background: bool) -> Self {
        self.background = background;
        self
    }

    /// Whether a handled match consumes the event (default `true`).
    pub fn eat(mut self, eat: bool) -> Self {
        self.eat = eat;
        self
    }

    /// Hook priority of this command (default 0).
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Declares a coercion for the named capture group.
    pub fn arg(mut self, name: impl Into<String>, coerce: Coerce) -> Self {
        self.coercions.insert(name.into(), coerce);
        self
    }

    /// Sets the command handler.
    pub fn handler<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Context, Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), ingot_core::BoxError>> + Send + 'static,
    {
        self.handler = Some(Arc::new(move |ctx, args| Box::pin(f(ctx, args))));
        self
    }

    /// Compiles the pattern and finalizes the registration.
    pub(crate) fn compile(self) -> Result<CommandSpec, BuildError> {
        let handler = self
            .handler
            .ok_or_else(|| BuildError::MissingHandler(self.pattern.clone()))?;
        let pattern = Regex::new(&format!("^(?:{})$", self.pattern)).map_err(|source| {
            BuildError::Pattern {
                pattern: self.pattern.clone(),
                source,
            }
        })?;
        Ok(CommandSpec {
            source: self.pattern,
            pattern,
            mention: self.mention,
            context_tag: self.context_tag,
            permissions: self.permissions,
            background: self.background,
            eat: self.eat,
            priority: self.priority,
            coercions: self.coercions,
            handler,
        })
    }
}

/// A compiled command registration.
pub(crate) struct CommandSpec {
    pub(crate) source: String,
    pub(crate) pattern: Regex,
    pub(crate) mention: bool,
    pub(crate) context_tag: Option<String>,
    pub(crate) permissions: Vec<String>,
    pub(crate) background: bool,
    pub(crate) eat: bool,
    pub(crate) priority: i32,
    pub(crate) coercions: HashMap<String, Coerce>,
    pub(crate) handler: CommandFn,
}

/// Strips a leading mention of `nick` from `input`.
///
/// Accepts `nick` followed by an optional `:` or `,` and at least one
/// whitespace character. Matching is ASCII case-insensitive. Returns the
/// remaining text, or `None` when the input does not address the bot.
pub(crate) fn strip_mention<'a>(nick: &str, input: &'a str) -> Option<&'a str> {
    if nick.is_empty() || input.len() < nick.len() || !input.is_char_boundary(nick.len()) {
        return None;
    }
    let (head, rest) = input.split_at(nick.len());
    if !head.eq_ignore_ascii_case(nick) {
        return None;
    }
    let rest = rest.strip_prefix([':', ',']).unwrap_or(rest);
    let stripped = rest.trim_start();
    // Whitespace after the name is mandatory; "nickname" must not match "nick".
    if stripped.len() == rest.len() {
        return None;
    }
    Some(stripped)
}

/// Wraps a command spec into the hook callback registered on the message
/// topics.
pub(crate) fn bind(spec: Arc<CommandSpec>) -> HookFn {
    Arc::new(move |ctx: Context| {
        let spec = Arc::clone(&spec);
        Box::pin(async move {
            let Some(event) = ctx.event().cloned() else {
                return Ok(Outcome::Continue);
            };
            let Some(connection) = ctx.connection() else {
                return Ok(Outcome::Continue);
            };
            let (Some(target), Some(text)) = (event.target.as_deref(), event.text.as_deref())
            else {
                return Ok(Outcome::Continue);
            };

            // Gate 1: conversational context tag.
            if let Some(tag) = &spec.context_tag
                && !ctx.has_context(tag)
            {
                return Ok(Outcome::Continue);
            }

            // Gate 2: permissions. Channel-scoped grants only count inside
            // their channel; global grants always count.
            if !spec.permissions.is_empty() {
                let Some(origin) = event.origin.as_deref() else {
                    return Ok(Outcome::Continue);
                };
                let channel = connection.is_channel(target).then_some(target);
                let acl = ctx.engine().acl();
                for permission in &spec.permissions {
                    if !acl.has(connection.network(), origin, permission, channel) {
                        return Ok(Outcome::Continue);
                    }
                }
            }

            // Gate 3: mention. Private messages are already addressed to us.
            let mut input = text;
            if spec.mention && event.topic != topics::PRIVATE_MESSAGE {
                match strip_mention(&connection.nickname(), input) {
                    Some(rest) => input = rest,
                    None => return Ok(Outcome::Continue),
                }
            }

            // Gate 4: the pattern, anchored over the whole remaining input.
            let Some(captures) = spec.pattern.captures(input) else {
                return Ok(Outcome::Continue);
            };

            let mut args = Map::new();
            for name in spec.pattern.capture_names().flatten() {
                if let Some(m) = captures.name(name) {
                    let value = match spec.coercions.get(name) {
                        Some(coerce) => coerce.apply(m.as_str()).map_err(|message| {
                            format!("argument '{name}' of '{}': {message}", spec.source)
                        })?,
                        None => Value::String(m.as_str().to_string()),
                    };
                    args.insert(name.to_string(), value);
                }
            }
            let args = Value::Object(args);

            debug!(
                service = %ctx.service_name(),
                pattern = %spec.source,
                background = spec.background,
                "Command matched"
            );

            if spec.background {
                let handler = Arc::clone(&spec.handler);
                let source = spec.source.clone();
                let service = ctx.service_name().to_string();
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    if let Err(e) = handler(ctx, args).await {
                        error!(
                            service = %service,
                            pattern = %source,
                            error = %e,
                            "Background command failed"
                        );
                    }
                });
            } else {
                (spec.handler)(ctx.clone(), args).await?;
            }

            Ok(if spec.eat {
                Outcome::Eat
            } else {
                Outcome::Continue
            })
        })
    })
}
