use log::{debug, error, info};
use std::sync::Arc;
use thiserror::Error;

use crate::bot::cooldowns::CooldownTracker;
use crate::bot::giveaways::GiveawaySystem;
use crate::bot::moderation::ModerationEngine;
use crate::bot::permissions::has_permission;
use crate::clock::{choose, Picker};
use crate::store::{ChannelStore, CounterOverflow};
use crate::types::{normalize_id, ChatMessage, ChatUser, Command, PermissionLevel, Timer};

const MAX_LISTED_COMMANDS: usize = 25;

const EIGHT_BALL_ANSWERS: &[&str] = &[
    "It is certain.",
    "Without a doubt.",
    "Yes - definitely.",
    "Most likely.",
    "Outlook good.",
    "Ask again later.",
    "Better not tell you now.",
    "Cannot predict now.",
    "Concentrate and ask again.",
    "My reply is no.",
    "Outlook not so good.",
    "Very doubtful.",
];

const USAGE_PERMIT: &str = "Usage: !permit <user> (mods+)";
const USAGE_REGULAR: &str = "Usage: !regular add/remove <user> or !regular list (mods+)";
const USAGE_COMMAND: &str =
    "Usage: !command add <name> <response> | edit <name> <response> | del <name> (mods+)";
const USAGE_TIMER: &str =
    "Usage: !timer add <name> <interval_minutes> <msg1|msg2> | del <name> (mods+)";
const USAGE_COUNTER: &str = "Usage: !counter set <key> <value> | inc <key> | dec <key> (mods+)";
const USAGE_GIVEAWAY: &str = "Usage: !giveaway start <keyword> | pick | end (mods+)";
const USAGE_SLOW: &str = "Usage: !slow <seconds> (mods+)";
const USAGE_SHOUTOUT: &str = "Usage: !shoutout <user> (mods+)";
const USAGE_8BALL: &str = "Usage: !8ball <question>";

/// Why a built-in command could not run
#[derive(Debug, Error)]
pub enum CommandError {
    /// Malformed input; the text is replied to the user
    #[error("{0}")]
    Usage(String),
    #[error("storage failure: {0}")]
    Store(#[from] anyhow::Error),
}

impl CommandError {
    fn usage(text: &str) -> Self {
        CommandError::Usage(text.to_string())
    }
}

type CommandResult = Result<Option<String>, CommandError>;

/// Parsed `!name arg arg ...` invocation
struct Invocation<'a> {
    name: String,
    args: Vec<&'a str>,
}

pub struct CommandSystem {
    store: Arc<dyn ChannelStore>,
    cooldowns: Arc<CooldownTracker>,
    moderation: Arc<ModerationEngine>,
    giveaways: Arc<GiveawaySystem>,
    picker: Arc<dyn Picker>,
    command_prefix: String,
}

impl CommandSystem {
    pub fn new(
        store: Arc<dyn ChannelStore>,
        cooldowns: Arc<CooldownTracker>,
        moderation: Arc<ModerationEngine>,
        giveaways: Arc<GiveawaySystem>,
        picker: Arc<dyn Picker>,
        command_prefix: String,
    ) -> Self {
        Self {
            store,
            cooldowns,
            moderation,
            giveaways,
            picker,
            command_prefix,
        }
    }

    /// Run the command carried by `message`, if any, and return the reply to post
    pub async fn process_message(&self, message: &ChatMessage, user: &ChatUser) -> Option<String> {
        let invocation = self.parse(&message.content)?;
        let channel = normalize_id(&message.channel);

        debug!(
            "Processing command '{}' from user '{}' in #{}",
            invocation.name, message.username, channel
        );

        let result = match self.run_builtin(&channel, &invocation, message, user).await {
            Some(result) => result,
            None => self.run_custom(&channel, &invocation.name, message, user).await,
        };

        match result {
            Ok(reply) => reply.filter(|r| !r.trim().is_empty()),
            Err(CommandError::Usage(text)) => Some(text),
            Err(e) => {
                error!("Command '{}' failed in #{}: {}", invocation.name, channel, e);
                None
            }
        }
    }

    fn parse<'a>(&self, content: &'a str) -> Option<Invocation<'a>> {
        let rest = content.trim().strip_prefix(self.command_prefix.as_str())?;
        let mut parts = rest.split_whitespace();
        let name = parts.next()?.to_lowercase();
        Some(Invocation {
            name,
            args: parts.collect(),
        })
    }

    /// `None` when `name` is not a built-in
    async fn run_builtin(
        &self,
        channel: &str,
        invocation: &Invocation<'_>,
        message: &ChatMessage,
        user: &ChatUser,
    ) -> Option<CommandResult> {
        let args = invocation.args.as_slice();
        let is_mod = has_permission(user, PermissionLevel::Moderator);

        let result = match invocation.name.as_str() {
            "commands" => self.list_commands(channel, user).await,
            "8ball" => self.eight_ball(args).map(Some),
            "permit" if is_mod => self.permit(channel, args).await,
            "regular" if is_mod => self.regular(channel, args).await,
            "command" if is_mod => self.edit_command(channel, args).await,
            "timer" if is_mod => self.edit_timer(channel, args).await,
            "counter" if is_mod => self.counter(channel, args).await,
            "giveaway" if is_mod => self.giveaway(channel, args).await,
            "slow" if is_mod => match args.first() {
                Some(seconds) if seconds.parse::<u32>().is_ok() => {
                    Ok(Some(format!("/slow {}", seconds)))
                }
                _ => Err(CommandError::usage(USAGE_SLOW)),
            },
            "slowoff" if is_mod => Ok(Some("/slowoff".to_string())),
            "emoteonly" if is_mod => Ok(Some("/emoteonly".to_string())),
            "emoteoff" if is_mod => Ok(Some("/emoteonlyoff".to_string())),
            "clear" if is_mod => Ok(Some("/clear".to_string())),
            "shoutout" if is_mod => match args.first() {
                Some(target) => Ok(Some(format!("/shoutout {}", target.trim_start_matches('@')))),
                None => Err(CommandError::usage(USAGE_SHOUTOUT)),
            },
            "permit" | "regular" | "command" | "timer" | "counter" | "giveaway" | "slow" | "slowoff"
            | "emoteonly" | "emoteoff" | "clear" | "shoutout" => {
                debug!("User '{}' lacks permission for !{}", message.username, invocation.name);
                Ok(None)
            }
            _ => return None,
        };
        Some(result)
    }

    async fn run_custom(
        &self,
        channel: &str,
        name: &str,
        message: &ChatMessage,
        user: &ChatUser,
    ) -> CommandResult {
        let command = match self.store.lookup_command(channel, name).await? {
            Some(command) => command,
            None => {
                debug!("Unknown command: {}", name);
                return Ok(None);
            }
        };

        if !has_permission(user, command.permission) {
            debug!("User '{}' lacks {:?} for !{}", message.username, command.permission, name);
            return Ok(None);
        }

        let allowed = self
            .cooldowns
            .check_and_consume(
                channel,
                &command.name,
                &message.user_id,
                command.global_cooldown_seconds,
                command.user_cooldown_seconds,
            )
            .await;
        if !allowed {
            return Ok(None);
        }

        info!("Executing command '{}' for user '{}' in #{}", name, message.username, channel);
        Ok(Some(self.render_response(channel, &command, message).await?))
    }

    /// Substitute `${user}`, `${channel}` and `${count}` in a command response
    async fn render_response(
        &self,
        channel: &str,
        command: &Command,
        message: &ChatMessage,
    ) -> anyhow::Result<String> {
        let mut response = command
            .response
            .replace("${user}", &message.username)
            .replace("${channel}", channel);

        if response.contains("${count}") {
            let count = self
                .store
                .increment_counter(channel, &format!("cmd:{}", command.name), 1)
                .await?;
            response = response.replace("${count}", &count.to_string());
        }
        Ok(response)
    }

    async fn list_commands(&self, channel: &str, user: &ChatUser) -> CommandResult {
        let names: Vec<String> = self
            .store
            .list_commands(channel)
            .await?
            .into_iter()
            .filter(|c| has_permission(user, c.permission))
            .map(|c| c.name)
            .collect();

        let mut snippet =
            names.iter().take(MAX_LISTED_COMMANDS).cloned().collect::<Vec<_>>().join(", ");
        if names.len() > MAX_LISTED_COMMANDS {
            snippet.push_str(&format!(" (+{} more)", names.len() - MAX_LISTED_COMMANDS));
        }
        Ok(Some(format!("Commands: {}", snippet)))
    }

    fn eight_ball(&self, args: &[&str]) -> Result<String, CommandError> {
        if args.is_empty() {
            return Err(CommandError::usage(USAGE_8BALL));
        }
        choose(self.picker.as_ref(), EIGHT_BALL_ANSWERS)
            .map(|answer| answer.to_string())
            .ok_or_else(|| CommandError::usage(USAGE_8BALL))
    }

    async fn permit(&self, channel: &str, args: &[&str]) -> CommandResult {
        let target = args
            .first()
            .map(|t| t.trim_start_matches('@'))
            .ok_or_else(|| CommandError::usage(USAGE_PERMIT))?;
        self.moderation.permit_user(channel, target).await;
        Ok(Some(format!("{} can post a link for {}s.", target, self.moderation.permit_seconds())))
    }

    async fn regular(&self, channel: &str, args: &[&str]) -> CommandResult {
        match args {
            ["add", name, ..] => {
                let name = name.trim_start_matches('@');
                self.store.add_regular(channel, &normalize_id(name), name).await?;
                Ok(Some(format!("{} added as regular.", name)))
            }
            ["remove", name, ..] => {
                let name = name.trim_start_matches('@');
                self.store.remove_regular(channel, &normalize_id(name)).await?;
                Ok(Some(format!("{} removed from regulars.", name)))
            }
            ["list", ..] => {
                let regulars = self.store.list_regulars(channel).await?;
                let listed =
                    if regulars.is_empty() { "none".to_string() } else { regulars.join(", ") };
                Ok(Some(format!("Regulars: {}", listed)))
            }
            _ => Err(CommandError::usage(USAGE_REGULAR)),
        }
    }

    async fn edit_command(&self, channel: &str, args: &[&str]) -> CommandResult {
        match args {
            [action @ ("add" | "edit"), name, response @ ..] if !response.is_empty() => {
                let name = normalize_id(name.trim_start_matches(self.command_prefix.as_str()));
                let response = response.join(" ");
                // edits keep the stored permission and cooldowns
                let command = match self.store.lookup_command(channel, &name).await? {
                    Some(existing) if *action == "edit" => Command { response, ..existing },
                    _ => Command::new(&name, &response),
                };
                self.store.upsert_command(channel, command).await?;
                let verb = if *action == "add" { "added" } else { "updated" };
                Ok(Some(format!("Command !{} {}.", name, verb)))
            }
            ["del", name, ..] => {
                let name = normalize_id(name.trim_start_matches(self.command_prefix.as_str()));
                self.store.delete_command(channel, &name).await?;
                Ok(Some(format!("Command !{} deleted.", name)))
            }
            _ => Err(CommandError::usage(USAGE_COMMAND)),
        }
    }

    async fn edit_timer(&self, channel: &str, args: &[&str]) -> CommandResult {
        match args {
            ["add" | "edit", name, interval, messages @ ..] if !messages.is_empty() => {
                let interval_minutes = interval.parse::<u64>().map_err(|_| {
                    CommandError::usage("Timer interval must be a whole number of minutes.")
                })?;
                let messages: Vec<String> = messages
                    .join(" ")
                    .split('|')
                    .map(|m| m.trim().to_string())
                    .filter(|m| !m.is_empty())
                    .collect();
                if messages.is_empty() {
                    return Err(CommandError::usage(USAGE_TIMER));
                }

                let name = normalize_id(name);
                let timer = Timer {
                    name: name.clone(),
                    messages,
                    interval_minutes,
                    require_chat_activity: false,
                    enabled: true,
                };
                if timer.interval().is_none() {
                    return Err(CommandError::usage("Timer interval is out of range."));
                }
                self.store.upsert_timer(channel, timer).await?;
                Ok(Some(format!("Timer {} saved.", name)))
            }
            ["del", name, ..] => {
                let name = normalize_id(name);
                self.store.delete_timer(channel, &name).await?;
                Ok(Some(format!("Timer {} deleted.", name)))
            }
            _ => Err(CommandError::usage(USAGE_TIMER)),
        }
    }

    async fn counter(&self, channel: &str, args: &[&str]) -> CommandResult {
        match args {
            ["set", key, value] => {
                let value = value
                    .parse::<i64>()
                    .map_err(|_| CommandError::usage("Counter value must be a number."))?;
                let value = self.store.set_counter(channel, key, value).await?;
                Ok(Some(format!("{} set to {}", key, value)))
            }
            [step @ ("inc" | "dec"), key, ..] => {
                let delta = if *step == "inc" { 1 } else { -1 };
                match self.store.increment_counter(channel, key, delta).await {
                    Ok(value) => Ok(Some(format!("{} is now {}", key, value))),
                    Err(e) if e.downcast_ref::<CounterOverflow>().is_some() => {
                        Err(CommandError::usage("Counter is out of range."))
                    }
                    Err(e) => Err(e.into()),
                }
            }
            _ => Err(CommandError::usage(USAGE_COUNTER)),
        }
    }

    async fn giveaway(&self, channel: &str, args: &[&str]) -> CommandResult {
        match args {
            ["start", keyword, ..] => {
                self.giveaways.start(channel, keyword).await;
                Ok(Some(format!("Giveaway started with keyword '{}'.", keyword)))
            }
            ["end", ..] => {
                self.giveaways.end(channel).await;
                Ok(Some("Giveaway ended.".to_string()))
            }
            ["pick", ..] => Ok(Some(match self.giveaways.pick_winner(channel).await {
                Some(winner) => format!("Winner: {}!", winner.username),
                None => "No entries to pick from.".to_string(),
            })),
            _ => Err(CommandError::usage(USAGE_GIVEAWAY)),
        }
    }
}
