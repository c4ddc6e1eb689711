//! Token substitution with conditional sections.
//!
//! `{{token}}` is replaced by the mapped value, or nothing when the token is
//! unknown. `{{#token}}..{{/token}}` keeps its content only when the value is
//! non-empty and `{{^token}}..{{/token}}` only when it is empty or absent.
//! Sections nest. Tags whose name is not a plain identifier are left in the
//! output untouched.

mod email;

pub use email::{ComposedEmail, EmailComposer, EmailTemplates, RenderError, SubscriberLinks};

use std::collections::HashMap;

pub type TokenMap = HashMap<String, String>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Section `{0}` is never closed.")]
    UnclosedSection(String),
    #[error("Section `{found}` was closed while `{expected}` is open.")]
    MismatchedClose { expected: String, found: String },
    #[error("Section `{0}` was closed without being opened.")]
    UnopenedClose(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Text(String),
    Token(String),
    Section {
        name: String,
        inverted: bool,
        children: Vec<Node>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    nodes: Vec<Node>,
}

enum Tag<'a> {
    Token(&'a str),
    Open(&'a str),
    OpenInverted(&'a str),
    Close(&'a str),
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn classify(inner: &str) -> Option<Tag<'_>> {
    let inner = inner.trim();
    fn name(n: &str) -> Option<&str> {
        let n = n.trim();
        is_identifier(n).then_some(n)
    }
    let tag = if let Some(n) = inner.strip_prefix('#') {
        Tag::Open(name(n)?)
    } else if let Some(n) = inner.strip_prefix('^') {
        Tag::OpenInverted(name(n)?)
    } else if let Some(n) = inner.strip_prefix('/') {
        Tag::Close(name(n)?)
    } else {
        Tag::Token(name(inner)?)
    };
    Some(tag)
}

struct Frame {
    name: String,
    inverted: bool,
    children: Vec<Node>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut stack: Vec<Frame> = Vec::new();
        let mut root: Vec<Node> = Vec::new();
        let mut rest = source;

        fn push(stack: &mut [Frame], root: &mut Vec<Node>, node: Node) {
            let target = match stack.last_mut() {
                Some(frame) => &mut frame.children,
                None => root,
            };
            // Merge adjacent text so literal tags do not fragment the tree.
            if let (Node::Text(new), Some(Node::Text(prev))) = (&node, target.last_mut()) {
                prev.push_str(new);
                return;
            }
            target.push(node);
        }

        while let Some(start) = rest.find("{{") {
            let Some(len) = rest[start + 2..].find("}}") else {
                break;
            };
            let end = start + 2 + len;

            if start > 0 {
                push(&mut stack, &mut root, Node::Text(rest[..start].to_string()));
            }

            match classify(&rest[start + 2..end]) {
                Some(Tag::Token(name)) => push(&mut stack, &mut root, Node::Token(name.into())),
                Some(Tag::Open(name)) => stack.push(Frame {
                    name: name.into(),
                    inverted: false,
                    children: Vec::new(),
                }),
                Some(Tag::OpenInverted(name)) => stack.push(Frame {
                    name: name.into(),
                    inverted: true,
                    children: Vec::new(),
                }),
                Some(Tag::Close(name)) => {
                    let frame = stack
                        .pop()
                        .ok_or_else(|| TemplateError::UnopenedClose(name.into()))?;
                    if frame.name != name {
                        return Err(TemplateError::MismatchedClose {
                            expected: frame.name,
                            found: name.into(),
                        });
                    }
                    push(
                        &mut stack,
                        &mut root,
                        Node::Section {
                            name: frame.name,
                            inverted: frame.inverted,
                            children: frame.children,
                        },
                    );
                }
                None => push(
                    &mut stack,
                    &mut root,
                    Node::Text(rest[start..end + 2].to_string()),
                ),
            }

            rest = &rest[end + 2..];
        }

        if !rest.is_empty() {
            push(&mut stack, &mut root, Node::Text(rest.to_string()));
        }

        if let Some(frame) = stack.pop() {
            return Err(TemplateError::UnclosedSection(frame.name));
        }

        Ok(Self { nodes: root })
    }

    pub fn render(&self, tokens: &TokenMap) -> String {
        let mut out = String::new();
        render_nodes(&self.nodes, tokens, &mut out);
        out
    }
}

fn render_nodes(nodes: &[Node], tokens: &TokenMap, out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Token(name) => {
                if let Some(value) = tokens.get(name) {
                    out.push_str(value);
                }
            }
            Node::Section {
                name,
                inverted,
                children,
            } => {
                let present = tokens.get(name).is_some_and(|v| !v.is_empty());
                if present != *inverted {
                    render_nodes(children, tokens, out);
                }
            }
        }
    }
}

/// Parses and renders in one go.
pub fn render(source: &str, tokens: &TokenMap) -> Result<String, TemplateError> {
    Ok(Template::parse(source)?.render(tokens))
}

#[cfg(test)]
mod tests {
    use super::*;
    use claims::{assert_err_eq, assert_ok_eq};

    fn tokens(pairs: &[(&str, &str)]) -> TokenMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn tokens_are_substituted() {
        let t = tokens(&[("name", "Ursula"), ("site", "Earthsea")]);
        assert_ok_eq!(
            render("Hello {{name}}, welcome to {{ site }}!", &t),
            "Hello Ursula, welcome to Earthsea!".to_string()
        );
    }

    #[test]
    fn unknown_tokens_render_as_empty() {
        assert_ok_eq!(render("a{{missing}}b", &TokenMap::new()), "ab".to_string());
    }

    #[test]
    fn sections_render_only_for_non_empty_values() {
        let source = "{{#author}}by {{author}}{{/author}}";
        assert_ok_eq!(
            render(source, &tokens(&[("author", "Le Guin")])),
            "by Le Guin".to_string()
        );
        assert_ok_eq!(render(source, &tokens(&[("author", "")])), String::new());
        assert_ok_eq!(render(source, &TokenMap::new()), String::new());
    }

    #[test]
    fn inverted_sections_render_only_for_empty_values() {
        let source = "{{^excerpt}}No excerpt.{{/excerpt}}";
        assert_ok_eq!(render(source, &TokenMap::new()), "No excerpt.".to_string());
        assert_ok_eq!(render(source, &tokens(&[("excerpt", "")])), "No excerpt.".to_string());
        assert_ok_eq!(render(source, &tokens(&[("excerpt", "x")])), String::new());
    }

    #[test]
    fn sections_nest() {
        let source = "{{#story_title}}[{{story_title}}{{#story_link}} @ {{story_link}}{{/story_link}}]{{/story_title}}";
        assert_ok_eq!(
            render(
                source,
                &tokens(&[("story_title", "Dracula"), ("story_link", "/dracula")])
            ),
            "[Dracula @ /dracula]".to_string()
        );
        assert_ok_eq!(
            render(source, &tokens(&[("story_title", "Dracula")])),
            "[Dracula]".to_string()
        );
    }

    #[test]
    fn non_identifier_tags_are_kept_verbatim() {
        let source = "a {{ not a token }} b {{}} c {{ unterminated";
        assert_ok_eq!(render(source, &TokenMap::new()), source.to_string());
    }

    #[test]
    fn unclosed_sections_are_rejected() {
        assert_err_eq!(
            Template::parse("{{#title}}oops"),
            TemplateError::UnclosedSection("title".into())
        );
    }

    #[test]
    fn mismatched_closing_tags_are_rejected() {
        assert_err_eq!(
            Template::parse("{{#a}}{{#b}}{{/a}}{{/b}}"),
            TemplateError::MismatchedClose {
                expected: "b".into(),
                found: "a".into()
            }
        );
        assert_err_eq!(
            Template::parse("x{{/a}}"),
            TemplateError::UnopenedClose("a".into())
        );
    }

    #[test]
    fn rendering_is_deterministic() {
        let template = Template::parse("{{#a}}{{b}}{{/a}}{{^a}}-{{/a}}").unwrap();
        let t = tokens(&[("a", "1"), ("b", "2")]);
        assert_eq!(template.render(&t), template.render(&t));
    }
}
