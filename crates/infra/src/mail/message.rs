//! RFC 5322 メッセージの構築
//!
//! [`OutgoingEmail`] から lettre の [`Message`] を組み立てる。
//! 本文は text/plain と text/html の multipart/alternative。

use kokyaku_domain::mail::{MailError, OutgoingEmail};
use lettre::message::{
    Mailbox,
    Message,
    MultiPart,
    SinglePart,
    header::{ContentType, HeaderName, HeaderValue},
};

/// 送信用メッセージを構築する
///
/// 差出人・返信先の不正は送信設定の問題として [`MailError::Misconfigured`]、
/// 宛先の不正はその宛先だけの問題として [`MailError::SendFailed`] を返す。
pub fn build_message(email: &OutgoingEmail) -> Result<Message, MailError> {
    let from = mailbox(email.from_name.as_deref(), &email.from_address)
        .map_err(|e| MailError::Misconfigured(format!("差出人アドレス不正: {e}")))?;
    let to = mailbox(email.to_name.as_deref(), &email.to)
        .map_err(|e| MailError::SendFailed(format!("宛先アドレス不正: {e}")))?;

    let mut builder = Message::builder().from(from).to(to).subject(&email.subject);

    if let Some(reply_to) = &email.reply_to {
        let reply_to = reply_to
            .parse::<Mailbox>()
            .map_err(|e| MailError::Misconfigured(format!("返信先アドレス不正: {e}")))?;
        builder = builder.reply_to(reply_to);
    }

    for (name, value) in &email.headers {
        let name = HeaderName::new_from_ascii(name.clone())
            .map_err(|e| MailError::SendFailed(format!("ヘッダ名不正: {e}")))?;
        builder = builder.raw_header(HeaderValue::new(name, value.clone()));
    }

    builder
        .multipart(
            MultiPart::alternative()
                .singlepart(
                    SinglePart::builder()
                        .header(ContentType::TEXT_PLAIN)
                        .body(email.text_body.clone()),
                )
                .singlepart(
                    SinglePart::builder()
                        .header(ContentType::TEXT_HTML)
                        .body(email.html_body.clone()),
                ),
        )
        .map_err(|e| MailError::SendFailed(format!("メッセージ構築失敗: {e}")))
}

fn mailbox(name: Option<&str>, address: &str) -> Result<Mailbox, lettre::address::AddressError> {
    let address = address.trim().parse()?;
    Ok(Mailbox::new(name.map(str::to_string), address))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn email() -> OutgoingEmail {
        OutgoingEmail {
            to: "taro@example.com".to_string(),
            to_name: Some("山田 太郎".to_string()),
            from_address: "news@example.com".to_string(),
            from_name: Some("Example Shop".to_string()),
            reply_to: Some("support@example.com".to_string()),
            subject: "春のセール".to_string(),
            html_body: "<p>こんにちは</p>".to_string(),
            text_body: "こんにちは".to_string(),
            headers: vec![(
                "List-Unsubscribe".to_string(),
                "<https://crm.example.com/u/1?s=abc>".to_string(),
            )],
        }
    }

    #[test]
    fn test_ヘッダと宛先を含むメッセージを構築する() {
        let message = build_message(&email()).unwrap();
        let formatted = String::from_utf8(message.formatted()).unwrap();

        assert!(formatted.contains("List-Unsubscribe: <https://crm.example.com/u/1?s=abc>"));
        assert!(formatted.contains("Reply-To: support@example.com"));
        assert!(formatted.contains("multipart/alternative"));
        assert_eq!(message.envelope().to().len(), 1);
        assert_eq!(message.envelope().to()[0].to_string(), "taro@example.com");
    }

    #[test]
    fn test_宛先不正は宛先単位の失敗() {
        let result = build_message(&OutgoingEmail {
            to: "not-an-address".to_string(),
            ..email()
        });
        assert!(matches!(result, Err(MailError::SendFailed(_))));
    }

    #[test]
    fn test_差出人不正は設定不備() {
        let result = build_message(&OutgoingEmail {
            from_address: "".to_string(),
            ..email()
        });
        assert!(matches!(result, Err(MailError::Misconfigured(_))));
    }
}
