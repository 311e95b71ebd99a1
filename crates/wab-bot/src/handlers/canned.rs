use wab_core::messaging::types::OutgoingMessage;

use crate::router::Intent;

use super::HandlerContext;

pub const THANKS_REPLY: &str = "¡De nada! 🙌";
pub const HOW_ARE_YOU_REPLY: &str = "¡Todo bien por aquí! 😎 ¿Y tú?";
pub const LINK_WARNING: &str = "Anti-link activo 🚫";

fn greeting(ctx: &HandlerContext<'_>) -> OutgoingMessage {
    let sender = ctx.message.sender.without_device();
    OutgoingMessage::text_with_mentions(format!("Hola @{} bro 😎🔥", sender.user()), vec![sender])
}

pub async fn handle_canned(ctx: &HandlerContext<'_>, intent: Intent) -> anyhow::Result<()> {
    let message = match intent {
        Intent::Greeting => greeting(ctx),
        Intent::Thanks => OutgoingMessage::text(THANKS_REPLY),
        Intent::HowAreYou => OutgoingMessage::text(HOW_ARE_YOU_REPLY),
        Intent::LinkWarning => OutgoingMessage::text(LINK_WARNING),
        other => anyhow::bail!("{} is not a canned reply", other.name()),
    };
    ctx.messenger.send(&ctx.message.chat, message).await?;
    Ok(())
}
