//! Email delivery
//!
//! Handlers render an [`Email`] from caller-supplied [`EmailParams`] and hand
//! it to the configured [`EmailProvider`].

use async_trait::async_trait;
use anyhow::{Context, Result};
use lettre::{
    message::{Mailbox, MultiPart},
    transport::smtp::authentication::Credentials,
    Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::info;

use crate::config::{EmailConfig, EmailProviderKind, SmtpConfig};
use crate::models::EmailParams;
use crate::utils::html::escape_html;

/// A rendered message
#[derive(Debug, Clone)]
pub struct Email {
    pub to_email: String,
    pub to_name: Option<String>,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
}

#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn send(&self, email: &Email) -> Result<()>;
}

/// Build the provider selected in configuration
pub fn provider_from_config(config: &EmailConfig) -> Result<Box<dyn EmailProvider>> {
    match config.provider {
        EmailProviderKind::Log => Ok(Box::new(LogEmailProvider)),
        EmailProviderKind::Smtp => {
            let smtp = config
                .smtp
                .as_ref()
                .context("email.smtp must be set for the smtp provider")?;
            Ok(Box::new(SmtpEmailProvider::new(
                smtp,
                &config.from_email,
                &config.from_name,
            )?))
        }
    }
}

/// Development provider: logs that a message would be sent
///
/// Only the recipient and subject are logged; bodies carry credentials.
#[derive(Debug, Default, Clone)]
pub struct LogEmailProvider;

#[async_trait]
impl EmailProvider for LogEmailProvider {
    async fn send(&self, email: &Email) -> Result<()> {
        info!(to = %email.to_email, subject = %email.subject, "Email not sent (log provider)");
        Ok(())
    }
}

pub struct SmtpEmailProvider {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpEmailProvider {
    pub fn new(config: &SmtpConfig, from_email: &str, from_name: &str) -> Result<Self> {
        let mut builder = if config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .with_context(|| format!("Invalid SMTP relay: {}", config.host))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        }
        .port(config.port);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        let address: Address = from_email
            .parse()
            .with_context(|| format!("Invalid sender address: {from_email}"))?;
        let name = (!from_name.is_empty()).then(|| from_name.to_string());

        Ok(Self {
            transport: builder.build(),
            from: Mailbox::new(name, address),
        })
    }
}

#[async_trait]
impl EmailProvider for SmtpEmailProvider {
    async fn send(&self, email: &Email) -> Result<()> {
        let address: Address = email
            .to_email
            .parse()
            .context("Invalid recipient address")?;
        let message = Message::builder()
            .from(self.from.clone())
            .to(Mailbox::new(email.to_name.clone(), address))
            .subject(&email.subject)
            .multipart(MultiPart::alternative_plain_html(
                email.text_body.clone(),
                email.html_body.clone(),
            ))
            .context("Failed to build email")?;

        self.transport
            .send(message)
            .await
            .context("SMTP delivery failed")?;

        info!(to = %email.to_email, "Email sent");
        Ok(())
    }
}

/// Email carrying a magic link
pub fn magic_link_email(params: &EmailParams, link: &str) -> Email {
    let button = params.button_text.as_deref().unwrap_or("Sign in");
    let action_html = format!(
        r#"<p style="text-align:center"><a href="{href}" style="display:inline-block;padding:12px 24px;background:#1a73e8;color:#ffffff;text-decoration:none;border-radius:4px">{label}</a></p>
<p style="font-size:12px;color:#666666">If the button does not work, open this link: {link_text}</p>"#,
        href = escape_html(link),
        label = escape_html(button),
        link_text = escape_html(link),
    );
    let action_text = format!("{button}: {link}");

    render(params, &action_html, &action_text)
}

/// Email carrying a one-time password
pub fn otp_email(params: &EmailParams, code: &str) -> Email {
    let action_html = format!(
        r#"<p style="text-align:center;font-size:28px;letter-spacing:6px;font-family:monospace"><strong>{}</strong></p>"#,
        escape_html(code)
    );
    let action_text = format!("Your code: {code}");

    render(params, &action_html, &action_text)
}

fn render(params: &EmailParams, action_html: &str, action_text: &str) -> Email {
    let greeting = params.greeting.as_deref().unwrap_or("Hello");
    let salutation = match params.to_name.as_deref() {
        Some(name) if !name.is_empty() => format!("{greeting} {name},"),
        _ => format!("{greeting},"),
    };

    let logo = match params.logo_image_url.as_deref() {
        Some(src) if !src.is_empty() => {
            let img = format!(
                r#"<img src="{}" alt="{}" style="max-height:48px">"#,
                escape_html(src),
                escape_html(&params.service_name)
            );
            match params.logo_click_url.as_deref() {
                Some(href) if !href.is_empty() => {
                    format!(r#"<a href="{}">{img}</a>"#, escape_html(href))
                }
                _ => img,
            }
        }
        _ => String::new(),
    };
    let sub_title = params
        .sub_title
        .as_deref()
        .map(|s| format!("<h2>{}</h2>", escape_html(s)))
        .unwrap_or_default();

    let html_body = format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>{subject}</title></head>
<body style="font-family:sans-serif;max-width:600px;margin:0 auto">
{logo}
<h1>{title}</h1>
{sub_title}
<p>{salutation}</p>
{action_html}
<p style="font-size:12px;color:#666666">{service}</p>
</body>
</html>
"#,
        subject = escape_html(&params.subject),
        title = escape_html(&params.title),
        salutation = escape_html(&salutation),
        service = escape_html(&params.service_name),
    );

    let mut text_body = format!("{}\n\n", params.title);
    if let Some(sub_title) = params.sub_title.as_deref() {
        text_body.push_str(&format!("{sub_title}\n\n"));
    }
    text_body.push_str(&format!("{salutation}\n\n{action_text}\n\n{}\n", params.service_name));

    Email {
        to_email: params.to_email.clone(),
        to_name: params.to_name.clone().filter(|n| !n.is_empty()),
        subject: params.subject.clone(),
        text_body,
        html_body,
    }
}
