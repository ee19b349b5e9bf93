//! Role-tagged rendering of a [`Context`] for the completion service.

use parley_ai::{Message, Role};

use crate::context::Context;

/// Render `context` as chat messages, system prompt first.
///
/// The bot's own turns become `assistant` messages with their raw text; every
/// other turn is a `user` message prefixed with the author's display name so
/// the model can tell participants apart. Image URLs are attached only when
/// `vision_enabled` is set.
pub fn render_context(system_prompt: &str, context: &Context, vision_enabled: bool) -> Vec<Message> {
    let mut messages = Vec::with_capacity(context.entry_count() + 1);
    messages.push(Message::system(system_prompt));

    for group in &context.groups {
        messages.push(render_entry(
            group.is_own,
            &group.author_name,
            &group.text,
            &group.images,
            vision_enabled,
        ));
    }

    let target = &context.target;
    messages.push(render_entry(
        target.is_own,
        &target.author_name,
        &target.text,
        &target.images,
        vision_enabled,
    ));
    messages
}

fn render_entry(
    is_own: bool,
    author_name: &str,
    text: &str,
    images: &[String],
    vision_enabled: bool,
) -> Message {
    let (role, text) = if is_own {
        (Role::Assistant, text.to_string())
    } else {
        (Role::User, format!("{}:{}", author_name, text))
    };

    let images = if vision_enabled { images } else { &[] };
    Message::with_images(role, text, images)
}
