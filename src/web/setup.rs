use anyhow::{Context, Result};
use serde_json::{json, Value};
use teloxide::prelude::*;
use teloxide::types::AllowedUpdate;

/// Public URL for a route: the configured base, else `https://{host}`.
pub fn webhook_url(public_url: Option<&str>, host: Option<&str>, path: &str) -> Option<String> {
    let base = match public_url {
        Some(url) => url.trim_end_matches('/').to_string(),
        None => format!("https://{}", host.filter(|h| !h.is_empty())?),
    };
    Some(format!("{base}{path}"))
}

pub async fn set_webhook(bot: &Bot, url: &str, secret: Option<&str>) -> Result<()> {
    let parsed = reqwest::Url::parse(url).with_context(|| format!("Invalid webhook URL: {url}"))?;
    let mut req = bot
        .set_webhook(parsed)
        .allowed_updates(vec![AllowedUpdate::Message, AllowedUpdate::CallbackQuery]);
    if let Some(secret) = secret {
        req = req.secret_token(secret.to_string());
    }
    req.await.context("Telegram rejected setWebhook")?;
    tracing::info!(url, "Webhook registered");
    Ok(())
}

pub async fn webhook_info(bot: &Bot) -> Result<Value> {
    let info = bot.get_webhook_info().await.context("Telegram rejected getWebhookInfo")?;
    Ok(serde_json::to_value(&info)?)
}

pub async fn remove_webhook(bot: &Bot) -> Result<()> {
    bot.delete_webhook().await.context("Telegram rejected deleteWebhook")?;
    tracing::info!("Webhook removed");
    Ok(())
}

/// Header Telegram echoes the registered secret token in.
pub const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

/// True when no secret is configured or the header carries it.
pub fn secret_matches(expected: Option<&str>, presented: Option<&str>) -> bool {
    match expected {
        None => true,
        Some(secret) => presented == Some(secret),
    }
}

/// Body for `/api/setup` without a recognised action.
pub fn setup_help() -> Value {
    json!({
        "message": "Webhook setup endpoint",
        "actions": {
            "set": "/api/setup?action=set",
            "info": "/api/setup?action=info",
            "remove": "/api/setup?action=remove"
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_prefers_public_base() {
        assert_eq!(
            webhook_url(Some("https://bot.example.com/"), Some("ignored"), "/webhook").as_deref(),
            Some("https://bot.example.com/webhook")
        );
        assert_eq!(
            webhook_url(None, Some("my-app.vercel.app"), "/api/webhook").as_deref(),
            Some("https://my-app.vercel.app/api/webhook")
        );
        assert_eq!(webhook_url(None, None, "/webhook"), None);
        assert_eq!(webhook_url(None, Some(""), "/webhook"), None);
    }

    #[test]
    fn secret_check() {
        assert!(secret_matches(None, None));
        assert!(secret_matches(None, Some("anything")));
        assert!(secret_matches(Some("abc"), Some("abc")));
        assert!(!secret_matches(Some("abc"), None));
        assert!(!secret_matches(Some("abc"), Some("abd")));
    }

    #[tokio::test]
    async fn set_sends_secret_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", mockito::Matcher::Regex("SetWebhook$".into()))
            .match_body(mockito::Matcher::Regex("s3cret".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok":true,"result":true}"#)
            .create_async()
            .await;

        let bot = Bot::new("123:test").set_api_url(reqwest::Url::parse(&server.url()).unwrap());
        set_webhook(&bot, "https://bot.example.com/webhook", Some("s3cret")).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn remove_calls_delete_webhook() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", mockito::Matcher::Regex("DeleteWebhook$".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok":true,"result":true}"#)
            .create_async()
            .await;

        let bot = Bot::new("123:test").set_api_url(reqwest::Url::parse(&server.url()).unwrap());
        remove_webhook(&bot).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn telegram_error_surfaces() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", mockito::Matcher::Regex("SetWebhook$".into()))
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok":false,"error_code":400,"description":"Bad Request: bad webhook: HTTPS url must be provided for webhook"}"#)
            .create_async()
            .await;

        let bot = Bot::new("123:test").set_api_url(reqwest::Url::parse(&server.url()).unwrap());
        assert!(set_webhook(&bot, "https://bot.example.com/webhook", None).await.is_err());
        assert!(set_webhook(&bot, "not a url", None).await.is_err());
    }
}
