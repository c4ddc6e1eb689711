use reqwest::Url;

use super::{Template, TemplateError, TokenMap};
use crate::domain::{ContentItem, Subscriber, SubscriberEmail, VerificationCode};

const DEFAULT_NOTIFICATION_SUBJECT: &str = "New content on {{site_name}}";

const DEFAULT_NOTIFICATION_LAYOUT: &str = r#"<!DOCTYPE html>
<html>
<body style="font-family: sans-serif; line-height: 1.5;">
  <h1>{{site_name}}</h1>
  <p>There are new updates matching your subscription.</p>
  {{updates}}
  <hr>
  <p style="font-size: 12px;">
    You receive this email because {{email}} subscribed to {{#scope_post_types}}{{scope_post_types}} on {{/scope_post_types}}<a href="{{site_link}}">{{site_name}}</a>.
    <a href="{{edit_link}}">Edit your subscription</a> or <a href="{{unsubscribe_link}}">unsubscribe</a>.
  </p>
</body>
</html>"#;

const DEFAULT_LOOP_PART_POST: &str = r#"<div class="update post">
  <h2><a href="{{link}}">{{title}}</a></h2>
  <p><small>Post by {{author}} on {{date}} at {{time}}</small></p>
  {{#excerpt}}<p>{{excerpt}}</p>{{/excerpt}}
</div>"#;

const DEFAULT_LOOP_PART_STORY: &str = r#"<div class="update story">
  {{#thumbnail}}<img src="{{thumbnail}}" alt="" width="100">{{/thumbnail}}
  <h2><a href="{{link}}">{{title}}</a></h2>
  <p><small>Story by {{author}} on {{date}}</small></p>
  {{#excerpt}}<p>{{excerpt}}</p>{{/excerpt}}
</div>"#;

const DEFAULT_LOOP_PART_CHAPTER: &str = r#"<div class="update chapter">
  <h2><a href="{{link}}">{{title}}</a></h2>
  <p><small>Chapter{{#story_title}} of <a href="{{story_link}}">{{story_title}}</a>{{/story_title}} by {{author}} on {{date}} at {{time}}</small></p>
  {{#excerpt}}<p>{{excerpt}}</p>{{/excerpt}}{{^excerpt}}<p>No excerpt available.</p>{{/excerpt}}
</div>"#;

const DEFAULT_CONFIRMATION_SUBJECT: &str = "Please confirm your subscription to {{site_name}}";

const DEFAULT_CONFIRMATION_LAYOUT: &str = r#"<!DOCTYPE html>
<html>
<body style="font-family: sans-serif; line-height: 1.5;">
  <p>Thank you for subscribing to <a href="{{site_link}}">{{site_name}}</a>.</p>
  <p>Please <a href="{{activation_link}}">confirm your email address</a> within 24 hours, after which the request expires.</p>
  <p>Your code is <code>{{code}}</code>. You can <a href="{{edit_link}}">edit your subscription</a> or <a href="{{unsubscribe_link}}">unsubscribe</a> at any time.</p>
  <p>If you did not request this subscription, you can safely ignore this email.</p>
</body>
</html>"#;

/// Raw template sources as configured by the operator.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct EmailTemplates {
    pub notification_subject: String,
    pub notification_layout: String,
    pub loop_part_post: String,
    pub loop_part_story: String,
    pub loop_part_chapter: String,
    pub confirmation_subject: String,
    pub confirmation_layout: String,
}

impl Default for EmailTemplates {
    fn default() -> Self {
        Self {
            notification_subject: DEFAULT_NOTIFICATION_SUBJECT.into(),
            notification_layout: DEFAULT_NOTIFICATION_LAYOUT.into(),
            loop_part_post: DEFAULT_LOOP_PART_POST.into(),
            loop_part_story: DEFAULT_LOOP_PART_STORY.into(),
            loop_part_chapter: DEFAULT_LOOP_PART_CHAPTER.into(),
            confirmation_subject: DEFAULT_CONFIRMATION_SUBJECT.into(),
            confirmation_layout: DEFAULT_CONFIRMATION_LAYOUT.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Failed to build a subscriber link.")]
    Link(#[from] url::ParseError),
    #[error("The rendered subject is empty.")]
    EmptySubject,
    #[error("The rendered body is empty.")]
    EmptyBody,
}

/// Builds the personal links embedded in every email.
#[derive(Debug, Clone)]
pub struct SubscriberLinks {
    base_url: String,
}

impl SubscriberLinks {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn with_credentials(
        &self,
        route: &str,
        email: &SubscriberEmail,
        code: &VerificationCode,
    ) -> Result<Url, url::ParseError> {
        Url::parse_with_params(
            &format!("{}{}", self.base_url, route),
            &[("email", email.as_ref()), ("code", code.as_ref())],
        )
    }

    pub fn activation(&self, email: &SubscriberEmail, code: &VerificationCode) -> Result<Url, url::ParseError> {
        self.with_credentials("/subscriptions/confirm", email, code)
    }

    pub fn unsubscribe(&self, email: &SubscriberEmail, code: &VerificationCode) -> Result<Url, url::ParseError> {
        self.with_credentials("/subscriptions/unsubscribe", email, code)
    }

    pub fn edit(&self, email: &SubscriberEmail, code: &VerificationCode) -> Result<Url, url::ParseError> {
        self.with_credentials("/subscriptions", email, code)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedEmail {
    pub subject: String,
    pub html: String,
}

/// Parsed templates plus the site details shared by every email.
#[derive(Debug, Clone)]
pub struct EmailComposer {
    notification_subject: Template,
    notification_layout: Template,
    loop_part_post: Template,
    loop_part_story: Template,
    loop_part_chapter: Template,
    confirmation_subject: Template,
    confirmation_layout: Template,
    site_name: String,
    site_link: String,
    links: SubscriberLinks,
    excerpt_length: usize,
}

impl EmailComposer {
    pub fn new(
        templates: &EmailTemplates,
        site_name: impl Into<String>,
        base_url: impl Into<String>,
        excerpt_length: usize,
    ) -> Result<Self, TemplateError> {
        let base_url = base_url.into();
        Ok(Self {
            notification_subject: Template::parse(&templates.notification_subject)?,
            notification_layout: Template::parse(&templates.notification_layout)?,
            loop_part_post: Template::parse(&templates.loop_part_post)?,
            loop_part_story: Template::parse(&templates.loop_part_story)?,
            loop_part_chapter: Template::parse(&templates.loop_part_chapter)?,
            confirmation_subject: Template::parse(&templates.confirmation_subject)?,
            confirmation_layout: Template::parse(&templates.confirmation_layout)?,
            site_name: site_name.into(),
            links: SubscriberLinks::new(base_url.clone()),
            site_link: base_url,
            excerpt_length,
        })
    }

    fn loop_part(&self, content_type: &str) -> &Template {
        match content_type {
            "story" => &self.loop_part_story,
            "chapter" => &self.loop_part_chapter,
            _ => &self.loop_part_post,
        }
    }

    /// Site and subscriber values as plain text. Subjects render from these directly.
    fn site_tokens(&self, subscriber: &Subscriber) -> Result<TokenMap, RenderError> {
        let mut tokens = TokenMap::new();
        tokens.insert("site_name".into(), self.site_name.clone());
        tokens.insert("site_link".into(), self.site_link.clone());
        tokens.insert("email".into(), subscriber.email.as_ref().to_string());
        tokens.insert("code".into(), subscriber.code.as_ref().to_string());
        tokens.insert(
            "unsubscribe_link".into(),
            self.links
                .unsubscribe(&subscriber.email, &subscriber.code)?
                .to_string(),
        );
        tokens.insert(
            "edit_link".into(),
            self.links.edit(&subscriber.email, &subscriber.code)?.to_string(),
        );
        let post_types = subscriber
            .scope
            .content_types
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        tokens.insert("scope_post_types".into(), post_types);
        Ok(tokens)
    }

    /// Copy of `tokens` with the free-text values escaped for an HTML body.
    fn html_tokens(tokens: &TokenMap) -> TokenMap {
        tokens
            .iter()
            .map(|(name, value)| {
                let value = match name.as_str() {
                    "site_name" | "email" | "scope_post_types" => htmlescape::encode_minimal(value),
                    _ => value.clone(),
                };
                (name.clone(), value)
            })
            .collect()
    }

    fn update_tokens(&self, item: &ContentItem) -> TokenMap {
        let mut tokens = TokenMap::new();
        tokens.insert("id".into(), item.id.to_string());
        tokens.insert("type".into(), htmlescape::encode_minimal(&item.content_type));
        tokens.insert("title".into(), htmlescape::encode_minimal(item.title.trim()));
        tokens.insert("author".into(), htmlescape::encode_minimal(&item.author_name));
        tokens.insert(
            "excerpt".into(),
            htmlescape::encode_minimal(&truncate(item.excerpt.trim(), self.excerpt_length)),
        );
        tokens.insert("link".into(), item.link.clone());
        tokens.insert("date".into(), item.published_at.format("%B %-d, %Y").to_string());
        tokens.insert("time".into(), item.published_at.format("%H:%M").to_string());
        tokens.insert(
            "story_title".into(),
            htmlescape::encode_minimal(item.parent_title.as_deref().unwrap_or_default()),
        );
        tokens.insert(
            "story_link".into(),
            item.parent_link.clone().unwrap_or_default(),
        );
        tokens.insert(
            "thumbnail".into(),
            item.thumbnail.clone().unwrap_or_default(),
        );
        tokens
    }

    /// One email listing every update the subscriber matched in this cycle.
    pub fn notification(
        &self,
        subscriber: &Subscriber,
        updates: &[&ContentItem],
    ) -> Result<ComposedEmail, RenderError> {
        let updates_block = updates
            .iter()
            .map(|item| self.loop_part(&item.content_type).render(&self.update_tokens(item)))
            .collect::<Vec<_>>()
            .join("\n");

        let tokens = self.site_tokens(subscriber)?;
        let mut html_tokens = Self::html_tokens(&tokens);
        html_tokens.insert("updates".into(), updates_block);

        finish(
            self.notification_subject.render(&tokens),
            self.notification_layout.render(&html_tokens),
        )
    }

    pub fn confirmation(&self, subscriber: &Subscriber) -> Result<ComposedEmail, RenderError> {
        let mut tokens = self.site_tokens(subscriber)?;
        tokens.insert(
            "activation_link".into(),
            self.links
                .activation(&subscriber.email, &subscriber.code)?
                .to_string(),
        );

        finish(
            self.confirmation_subject.render(&tokens),
            self.confirmation_layout.render(&Self::html_tokens(&tokens)),
        )
    }
}

fn finish(subject: String, html: String) -> Result<ComposedEmail, RenderError> {
    // Subjects are single-line.
    let subject = subject.split_whitespace().collect::<Vec<_>>().join(" ");
    if subject.is_empty() {
        return Err(RenderError::EmptySubject);
    }
    if html.trim().is_empty() {
        return Err(RenderError::EmptyBody);
    }
    Ok(ComposedEmail { subject, html })
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}…", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::{TimeZone, Utc};
    use claims::{assert_matches, assert_ok};

    use super::*;
    use crate::domain::{NewSubscriber, PublishStatus, SubscriberScope};

    fn subscriber() -> Subscriber {
        NewSubscriber {
            email: SubscriberEmail::parse("reader@example.com".into()).unwrap(),
            scope: SubscriberScope::everything(),
        }
        .into_subscriber(Utc::now())
    }

    fn item(id: i64, content_type: &str, title: &str) -> ContentItem {
        ContentItem {
            id,
            content_type: content_type.into(),
            status: PublishStatus::Publish,
            has_password: false,
            hidden: false,
            excluded: false,
            author_id: 1,
            author_name: "Bram".into(),
            title: title.into(),
            excerpt: "A dark and stormy night.".into(),
            link: format!("https://example.com/{id}"),
            thumbnail: None,
            parent_id: Some(7),
            parent_title: Some("Dracula".into()),
            parent_link: Some("https://example.com/7".into()),
            term_ids: BTreeSet::new(),
            published_at: Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 0).unwrap(),
        }
    }

    fn composer(templates: &EmailTemplates) -> EmailComposer {
        EmailComposer::new(templates, "Night & Day", "https://example.com/", 10).unwrap()
    }

    #[test]
    fn default_templates_parse() {
        assert_ok!(EmailComposer::new(
            &EmailTemplates::default(),
            "Site",
            "https://example.com",
            100
        ));
    }

    #[test]
    fn a_notification_contains_every_update_and_personal_links() {
        let subscriber = subscriber();
        let (a, b) = (item(1, "post", "First"), item(2, "chapter", "Second"));
        let email = composer(&EmailTemplates::default())
            .notification(&subscriber, &[&a, &b])
            .unwrap();

        assert_eq!(email.subject, "New content on Night & Day");
        assert!(email.html.contains("<h1>Night &amp; Day</h1>"));
        assert!(email.html.contains("First"));
        assert!(email.html.contains("Second"));
        assert!(email.html.contains("of <a href=\"https://example.com/7\">Dracula</a>"));
        let links: Vec<_> = linkify::LinkFinder::new()
            .links(&email.html)
            .filter(|l| *l.kind() == linkify::LinkKind::Url)
            .map(|l| l.as_str().to_owned())
            .collect();
        let unsubscribe = links
            .iter()
            .find(|l| l.contains("/subscriptions/unsubscribe"))
            .expect("No unsubscribe link");
        assert!(unsubscribe.contains(subscriber.code.as_ref()));
        assert!(unsubscribe.starts_with("https://example.com/subscriptions/unsubscribe?"));
    }

    #[test]
    fn update_values_are_escaped_and_excerpts_truncated() {
        let mut templates = EmailTemplates::default();
        templates.loop_part_post = "{{title}}|{{excerpt}}".into();
        templates.notification_layout = "{{updates}}".into();
        let a = item(1, "post", "<script>");

        let email = composer(&templates).notification(&subscriber(), &[&a]).unwrap();

        assert_eq!(email.html, "&lt;script&gt;|A dark and…");
    }

    #[test]
    fn an_empty_subject_is_a_render_failure() {
        let mut templates = EmailTemplates::default();
        templates.notification_subject = "{{#scope_post_types}}News{{/scope_post_types}}".into();
        let a = item(1, "post", "First");

        let outcome = composer(&templates).notification(&subscriber(), &[&a]);

        assert_matches!(outcome, Err(RenderError::EmptySubject));
    }

    #[test]
    fn confirmation_contains_the_activation_link() {
        let subscriber = subscriber();
        let email = composer(&EmailTemplates::default())
            .confirmation(&subscriber)
            .unwrap();
        let activation = format!(
            "https://example.com/subscriptions/confirm?email=reader%40example.com&code={}",
            subscriber.code.as_ref()
        );
        assert!(email.html.contains(&activation));
        assert_eq!(
            email.subject,
            "Please confirm your subscription to Night & Day"
        );
        assert!(email.html.contains(">Night &amp; Day</a>"));
    }
}
