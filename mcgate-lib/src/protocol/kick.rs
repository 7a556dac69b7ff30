//! Login-state disconnect messages.

use bytes::BytesMut;
use chrono::Utc;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::chat::{ChatMessage, ClickEvent, Color};
use crate::config::Settings;
use crate::sniff::varint::{frame, write_string, write_varint};

const PACKET_LOGIN_DISCONNECT: i32 = 0x00;

/// Who is being kicked and from where, for the message footer.
#[derive(Debug, Clone, Copy)]
pub struct KickContext<'a> {
    pub settings: &'a Settings,
    pub service: &'a str,
    pub player: &'a str,
}

/// Generic refusal (access lists, unknown hostname).
pub fn access_denied(ctx: &KickContext<'_>) -> ChatMessage {
    refusal(ctx, "Your connection was refused or you are not allowed to join this server.", None)
}

/// The service's player cap is reached.
pub fn server_full(ctx: &KickContext<'_>) -> ChatMessage {
    refusal(ctx, "The server is full.", None)
}

/// The player's daily traffic allowance is used up.
///
/// A configured template wins over the styled default; it may use
/// `{player}`, `{used}`, `{limit}` and `{percentage}`.
pub fn traffic_exceeded(
    ctx: &KickContext<'_>,
    template: Option<&str>,
    used_mb: f64,
    limit_mb: f64,
    percentage: f64,
) -> ChatMessage {
    if let Some(template) = template.filter(|t| !t.is_empty()) {
        let text = template
            .replace("{player}", ctx.player)
            .replace("{used}", &format!("{used_mb:.2}"))
            .replace("{limit}", &format!("{limit_mb:.0}"))
            .replace("{percentage}", &format!("{percentage:.1}"));
        return ChatMessage::text(text);
    }

    let usage = vec![
        ChatMessage::text("Used: ").color(Color::Gray),
        ChatMessage::text(format!("{used_mb:.2} MB ")).color(Color::Yellow),
        ChatMessage::text("/ ").color(Color::Gray),
        ChatMessage::text(format!("{limit_mb:.0} MB ")).color(Color::Green),
        ChatMessage::text(format!("({percentage:.1}%)\n")).color(Color::White),
    ];
    refusal(ctx, "Your daily traffic allowance is used up.", Some(usage))
}

fn refusal(ctx: &KickContext<'_>, reason: &str, details: Option<Vec<ChatMessage>>) -> ChatMessage {
    let mut msg = ChatMessage::text("")
        .color(Color::White)
        .push(ChatMessage::text(ctx.settings.header.as_str()).bold().color(Color::Yellow))
        .push(ChatMessage::text(" | "))
        .push(ChatMessage::text("Service refused\n").bold().color(Color::Red))
        .push(ChatMessage::text("You cannot join this server.\n"))
        .push(ChatMessage::text("Reason: "))
        .push(ChatMessage::text(format!("{reason}\n")).color(Color::LightPurple));
    for detail in details.into_iter().flatten() {
        msg = msg.push(detail);
    }
    msg = msg
        .push(ChatMessage::text("Please contact an administrator for help.\n\n"))
        .push(
            ChatMessage::text(format!(
                "Timestamp: {} | Player: {} | Service: {}\n",
                Utc::now().timestamp_millis(),
                ctx.player,
                ctx.service
            ))
            .color(Color::Gray),
        );

    let settings = ctx.settings;
    if !settings.contact_name.is_empty() || !settings.contact_link.is_empty() {
        msg = msg.push(ChatMessage::text(format!("{}: ", settings.contact_name)));
        if !settings.contact_link.is_empty() {
            msg = msg.push(
                ChatMessage::text(settings.contact_link.as_str())
                    .color(Color::Blue)
                    .underlined()
                    .click(ClickEvent::open_url(settings.contact_link.as_str())),
            );
        }
    }
    msg
}

/// Encode a login Disconnect packet carrying `msg`.
pub fn encode_disconnect(msg: &ChatMessage) -> BytesMut {
    let mut payload = BytesMut::new();
    write_varint(PACKET_LOGIN_DISCONNECT, &mut payload);
    write_string(&msg.to_json(), &mut payload);
    frame(&payload)
}

/// Send a disconnect packet and flush; the caller closes the socket.
pub async fn send_kick<W>(stream: &mut W, msg: &ChatMessage) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    stream.write_all(&encode_disconnect(msg)).await?;
    stream.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sniff::read_frame;
    use crate::sniff::varint::read_string;

    fn settings() -> Settings {
        Settings {
            header: "mcgate".into(),
            contact_name: "Discord".into(),
            contact_link: "https://example.com/discord".into(),
        }
    }

    #[test]
    fn test_template_placeholders() {
        let settings = settings();
        let ctx = KickContext { settings: &settings, service: "lobby", player: "Steve" };
        let msg = traffic_exceeded(
            &ctx,
            Some("{player} used {used}/{limit} MB ({percentage}%)"),
            1023.456,
            1024.0,
            99.94,
        );
        assert_eq!(msg.text, "Steve used 1023.46/1024 MB (99.9%)");
        assert!(msg.extra.is_empty());
    }

    #[test]
    fn test_default_traffic_message_shows_usage() {
        let settings = settings();
        let ctx = KickContext { settings: &settings, service: "lobby", player: "Steve" };
        let text = traffic_exceeded(&ctx, None, 12.5, 100.0, 12.5).plain_text();
        assert!(text.contains("12.50 MB"));
        assert!(text.contains("100 MB"));
        assert!(text.contains("(12.5%)"));
        assert!(text.contains("Player: Steve | Service: lobby"));
    }

    #[test]
    fn test_contact_line() {
        let settings = settings();
        let ctx = KickContext { settings: &settings, service: "lobby", player: "Alex" };
        let msg = server_full(&ctx);
        let last = msg.extra.last().cloned().unwrap_or_default();
        assert_eq!(last.text, "https://example.com/discord");
        assert!(last.underlined);
        assert!(last.click_event.is_some());

        let bare = Settings { header: "x".into(), contact_name: String::new(), contact_link: String::new() };
        let ctx = KickContext { settings: &bare, service: "lobby", player: "Alex" };
        assert!(access_denied(&ctx).plain_text().ends_with("Service: lobby\n"));
    }

    #[test]
    fn test_disconnect_packet() {
        let msg = ChatMessage::text("bye");
        let packet = encode_disconnect(&msg);
        let frame = read_frame(&packet).ok().flatten();
        let Some(frame) = frame else { panic!("expected a complete frame") };
        assert_eq!(frame.packet_id, 0);
        assert_eq!(frame.end, packet.len());
        let json = read_string(&packet, frame.body_start, frame.end).map(|(s, _)| s);
        assert_eq!(json, Ok(r#"{"text":"bye"}"#.to_string()));
    }
}
