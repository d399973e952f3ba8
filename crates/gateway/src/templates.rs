//! Template set, built once at startup and immutable afterwards.

use minijinja::{Environment, Value};

const TEMPLATES: &[(&str, &str)] = &[
    ("shell.html", include_str!("../templates/shell.html")),
    ("message.html", include_str!("../templates/message.html")),
    (
        "user_message.html",
        include_str!("../templates/user_message.html"),
    ),
    (
        "code_updates.html",
        include_str!("../templates/code_updates.html"),
    ),
    ("tab_code.html", include_str!("../templates/tab_code.html")),
    (
        "tab_preview.html",
        include_str!("../templates/tab_preview.html"),
    ),
    (
        "tab_terminal.html",
        include_str!("../templates/tab_terminal.html"),
    ),
    (
        "tab_deployment.html",
        include_str!("../templates/tab_deployment.html"),
    ),
    ("file_view.html", include_str!("../templates/file_view.html")),
    (
        "file_placeholder.html",
        include_str!("../templates/file_placeholder.html"),
    ),
    ("file_list.html", include_str!("../templates/file_list.html")),
    (
        "preview_empty.html",
        include_str!("../templates/preview_empty.html"),
    ),
    (
        "preview_error.html",
        include_str!("../templates/preview_error.html"),
    ),
];

/// Parse every embedded template into one environment.
pub fn build_environment() -> Result<Environment<'static>, minijinja::Error> {
    let mut env = Environment::new();
    for (name, source) in TEMPLATES {
        env.add_template(name, source)?;
    }
    Ok(env)
}

/// Render a named template; errors are the caller's 500.
pub fn render(
    env: &Environment<'_>,
    name: &str,
    ctx: Value,
) -> Result<String, minijinja::Error> {
    env.get_template(name)?.render(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use minijinja::context;

    #[test]
    fn every_template_parses() {
        build_environment().expect("all embedded templates must parse");
    }

    #[test]
    fn message_template_controls_the_oob_marker() {
        let env = build_environment().unwrap();
        let parts = vec![context! {
            part_id => "p1",
            kind => "text",
            content => "hi",
            html => "<div class=\"part part-text\"><p>hi</p></div>",
        }];

        let first = render(
            &env,
            "message.html",
            context! { message_id => "m1", oob => false, parts => parts.clone() },
        )
        .unwrap();
        assert!(first.contains("id=\"assistant-m1\""));
        assert!(!first.contains("hx-swap-oob"));

        let later = render(
            &env,
            "message.html",
            context! { message_id => "m1", oob => true, parts => parts },
        )
        .unwrap();
        assert!(later.contains("hx-swap-oob=\"true\""));
        assert!(later.contains("<p>hi</p>"));
    }

    #[test]
    fn file_list_preserves_selection() {
        let env = build_environment().unwrap();
        let html = render(
            &env,
            "file_list.html",
            context! {
                files => vec!["a.py", "b.py"],
                current => "b.py",
                options_only => true,
            },
        )
        .unwrap();
        assert!(html.contains("<option value=\"a.py\">"));
        assert!(html.contains("<option value=\"b.py\" selected>"));
        assert!(!html.contains("<select"));
    }

    #[test]
    fn user_message_escapes_content() {
        let env = build_environment().unwrap();
        let html = render(
            &env,
            "user_message.html",
            context! { message => "<b>hi</b>" },
        )
        .unwrap();
        assert!(html.contains("&lt;b&gt;hi&lt;/b&gt;"));
    }
}
