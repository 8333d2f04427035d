//! HTML for the verification and admin pages

use crate::error::BotError;
use crate::logging::LogEntry;
use crate::managers::ReplicationReport;
use crate::state::VerifiedUser;

/// Escape HTML special characters
pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn card_page(title: &str, gradient: &str, accent: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title}</title>
    <style>
        body {{
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            min-height: 100vh;
            margin: 0;
            background: {gradient};
        }}
        .container {{
            background: white;
            padding: 40px;
            border-radius: 16px;
            box-shadow: 0 10px 40px rgba(0,0,0,0.2);
            text-align: center;
            max-width: 440px;
        }}
        h1 {{ color: {accent}; margin-bottom: 10px; }}
        .icon {{ font-size: 60px; margin-bottom: 20px; color: {accent}; }}
        .message {{
            background: #fff5f5;
            padding: 15px;
            border-radius: 8px;
            color: #c53030;
            margin: 20px 0;
        }}
        .hint {{ color: #555; font-size: 14px; }}
        .info {{
            background: #f5f5f5;
            padding: 15px;
            border-radius: 8px;
            margin: 20px 0;
            text-align: left;
        }}
        .info-row {{
            display: flex;
            justify-content: space-between;
            padding: 5px 0;
            border-bottom: 1px solid #eee;
        }}
        .info-row:last-child {{ border-bottom: none; }}
        .label {{ color: #888; }}
        .value {{ color: #333; font-weight: 500; }}
        .footer {{ color: #888; font-size: 14px; }}
    </style>
</head>
<body>
    <div class="container">
{body}
    </div>
</body>
</html>"#
    )
}

pub fn success_page(display_name: &str, discord_id: &str, result: &str) -> String {
    let body = format!(
        r#"        <div class="icon">✓</div>
        <h1>Verification Successful!</h1>
        <div class="info">
            <div class="info-row"><span class="label">Display Name:</span><span class="value">{}</span></div>
            <div class="info-row"><span class="label">Discord ID:</span><span class="value">{}</span></div>
            <div class="info-row"><span class="label">Result:</span><span class="value">{}</span></div>
        </div>
        <p class="footer">You can now close this window and check Discord.</p>"#,
        html_escape(display_name),
        html_escape(discord_id),
        html_escape(result)
    );
    card_page(
        "Verification Success",
        "linear-gradient(135deg, #11998e 0%, #38ef7d 100%)",
        "#11998e",
        &body,
    )
}

/// What the user (or an admin) can do about a failure, when there is something specific
pub fn error_hint(error: &BotError) -> &'static str {
    match error {
        BotError::MissingCode
        | BotError::AuthorizationDenied { .. }
        | BotError::StateMismatch { .. }
        | BotError::TokenExchange { .. } => {
            "Run /verify in Discord again and use the new link. Links work once."
        }
        BotError::RoleHierarchy { .. } => {
            "An administrator must move the bot's role above the verified role in Server Settings > Roles."
        }
        BotError::RoleNotFound { .. } => {
            "The verified role no longer exists. An administrator must update VERIFIED_ROLE_ID."
        }
        BotError::PermissionDenied { .. } => {
            "The bot needs the Manage Roles and Create Instant Invite permissions in this server."
        }
        BotError::NotAMember { .. } => "Join the server first, then verify again.",
        BotError::RateLimited { .. } => "Discord is rate limiting us. Wait a few seconds and retry.",
        _ => "Please try again or contact an administrator.",
    }
}

pub fn error_page(error: &BotError) -> String {
    let body = format!(
        r#"        <div class="icon">✕</div>
        <h1>Verification Failed</h1>
        <div class="message">{}</div>
        <p class="hint">{}</p>"#,
        html_escape(&error.public_message()),
        html_escape(error_hint(error))
    );
    card_page(
        "Verification Error",
        "linear-gradient(135deg, #f093fb 0%, #f5576c 100%)",
        "#f5576c",
        &body,
    )
}

fn admin_css() -> &'static str {
    r#"
        * { box-sizing: border-box; margin: 0; padding: 0; }
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            background: #1a1a2e;
            min-height: 100vh;
            color: #fff;
        }
        .navbar {
            background: rgba(255,255,255,0.05);
            padding: 1rem 2rem;
            display: flex;
            justify-content: space-between;
            align-items: center;
            border-bottom: 1px solid rgba(255,255,255,0.1);
        }
        .navbar h1 { font-size: 1.25rem; }
        .navbar a { color: #5865F2; text-decoration: none; margin-left: 1rem; }
        .container { max-width: 1200px; margin: 0 auto; padding: 2rem; }
        .cards {
            display: grid;
            grid-template-columns: repeat(auto-fit, minmax(280px, 1fr));
            gap: 1.5rem;
            margin-bottom: 2rem;
        }
        .card {
            background: rgba(255,255,255,0.05);
            border-radius: 12px;
            padding: 1.5rem;
            border: 1px solid rgba(255,255,255,0.1);
        }
        .card h2 { font-size: 1rem; color: #a0a0a0; margin-bottom: 0.75rem; }
        .card .value { font-size: 2rem; font-weight: bold; }
        table { width: 100%; border-collapse: collapse; }
        th, td { text-align: left; padding: 0.6rem; border-bottom: 1px solid rgba(255,255,255,0.1); }
        th { color: #a0a0a0; font-weight: 500; }
        input[type=text], input[type=password] {
            padding: 0.6rem 0.8rem;
            border-radius: 8px;
            border: 1px solid rgba(255,255,255,0.2);
            background: rgba(255,255,255,0.05);
            color: #fff;
            font-size: 1rem;
            margin-bottom: 0.5rem;
            width: 100%;
        }
        .btn {
            display: inline-block;
            padding: 0.6rem 1.2rem;
            border-radius: 8px;
            border: none;
            cursor: pointer;
            font-size: 0.95rem;
            background: #5865F2;
            color: white;
        }
        .btn:hover { background: #4752c4; }
        .btn-small { padding: 0.3rem 0.7rem; font-size: 0.8rem; }
        .message { padding: 1rem; border-radius: 8px; margin-bottom: 1.5rem; }
        .message.success { background: rgba(46, 204, 113, 0.2); border: 1px solid #2ecc71; }
        .message.error { background: rgba(231, 76, 60, 0.2); border: 1px solid #e74c3c; }
        .muted { color: #888; font-size: 0.85rem; }
        code { color: #c9d1ff; }
    "#
}

fn admin_page(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title} - guildgate admin</title>
    <style>{css}</style>
</head>
<body>
    <nav class="navbar">
        <h1>guildgate admin</h1>
        <div><a href="/admin/dashboard">Dashboard</a><a href="/admin/logs">Logs</a><a href="/admin/logout">Logout</a></div>
    </nav>
    <div class="container">
{body}
    </div>
</body>
</html>"#,
        title = title,
        css = admin_css(),
        body = body
    )
}

pub fn login_page(error: Option<&str>) -> String {
    let error_html = error
        .map(|e| format!(r#"<div class="message error">{}</div>"#, html_escape(e)))
        .unwrap_or_default();
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Admin Login - guildgate</title>
    <style>{css}
        .login {{ max-width: 380px; margin: 15vh auto; }}
    </style>
</head>
<body>
    <div class="login card">
        <h2>Admin Panel</h2>
        {error_html}
        <form method="post" action="/admin/login">
            <input type="password" name="password" placeholder="Password" autofocus>
            <button class="btn" type="submit">Sign in</button>
        </form>
    </div>
</body>
</html>"#,
        css = admin_css(),
        error_html = error_html
    )
}

/// Outcome of an admin action, shown above the dashboard
pub enum Flash {
    Success(String),
    Error(String),
}

impl Flash {
    fn render(&self) -> String {
        let (class, text) = match self {
            Flash::Success(text) => ("success", text),
            Flash::Error(text) => ("error", text),
        };
        format!(
            r#"<div class="message {}">{}</div>"#,
            class,
            html_escape(text)
        )
    }
}

pub struct DashboardView<'a> {
    pub users: &'a [VerifiedUser],
    pub backup_guild: Option<String>,
    pub guild_id: String,
    pub role_id: String,
    pub scope: &'a str,
    pub redirect_uri: &'a str,
    pub flash: Option<Flash>,
    pub report: Option<&'a ReplicationReport>,
}

fn report_html(report: &ReplicationReport) -> String {
    let failures: String = report
        .failed
        .iter()
        .map(|(id, reason)| {
            format!(
                "<tr><td><code>{}</code></td><td>{}</td></tr>",
                html_escape(id),
                html_escape(reason)
            )
        })
        .collect();
    let failure_table = if failures.is_empty() {
        String::new()
    } else {
        format!(
            "<table><tr><th>User</th><th>Reason</th></tr>{}</table>",
            failures
        )
    };
    format!(
        r#"<div class="card" style="margin-bottom: 2rem;">
            <h2>Replication to {}</h2>
            <p>{} succeeded, {} failed</p>
            {}
        </div>"#,
        report.guild_id,
        report.succeeded_count(),
        report.failed_count(),
        failure_table
    )
}

pub fn dashboard_page(view: &DashboardView<'_>) -> String {
    let rows: String = view
        .users
        .iter()
        .map(|user| {
            format!(
                r#"<tr>
                <td>{name}</td>
                <td><code>{id}</code></td>
                <td>{at}</td>
                <td>{token}</td>
                <td><form method="post" action="/admin/add-to-guild">
                    <input type="hidden" name="user_id" value="{id}">
                    <button class="btn btn-small" type="submit">Add to backup</button>
                </form></td>
            </tr>"#,
                name = html_escape(&user.display_name),
                id = html_escape(&user.discord_id),
                at = user.verified_at.format("%Y-%m-%d %H:%M UTC"),
                token = if user.access_token.is_some() { "yes" } else { "no" },
            )
        })
        .collect();

    let users_table = if view.users.is_empty() {
        r#"<p class="muted">No one has verified yet.</p>"#.to_string()
    } else {
        format!(
            "<table><tr><th>Name</th><th>Discord ID</th><th>Verified</th><th>Token</th><th></th></tr>{}</table>",
            rows
        )
    };

    let backup_value = view.backup_guild.as_deref().unwrap_or("");
    let backup_display = view
        .backup_guild
        .as_deref()
        .map(|g| format!("<code>{}</code>", html_escape(g)))
        .unwrap_or_else(|| "not set".to_string());

    let body = format!(
        r#"{flash}
        {report}
        <div class="cards">
            <div class="card">
                <h2>Verified users</h2>
                <div class="value">{count}</div>
                <p class="muted">Guild <code>{guild}</code>, role <code>{role}</code></p>
            </div>
            <div class="card">
                <h2>Backup guild: {backup_display}</h2>
                <form method="post" action="/admin/backup-guild">
                    <input type="text" name="guild_id" value="{backup_value}" placeholder="Guild ID">
                    <button class="btn" type="submit">Save</button>
                </form>
            </div>
            <div class="card">
                <h2>Replicate</h2>
                <form method="post" action="/admin/add-all-to-backup" style="margin-bottom: 0.75rem;">
                    <button class="btn" type="submit">Add all to backup guild</button>
                </form>
                <form method="post" action="/admin/invite">
                    <button class="btn" type="submit">Create backup invite</button>
                </form>
                <p class="muted">The invite is for users whose stored token expired.</p>
            </div>
        </div>
        <div class="card" style="margin-bottom: 2rem;">
            <h2>OAuth</h2>
            <p class="muted">Scope <code>{scope}</code>. Redirect URI registered in the Developer Portal must be <code>{redirect}</code></p>
        </div>
        <div class="card">
            <h2>Ledger</h2>
            {users_table}
        </div>"#,
        flash = view.flash.as_ref().map(Flash::render).unwrap_or_default(),
        report = view.report.map(report_html).unwrap_or_default(),
        count = view.users.len(),
        guild = html_escape(&view.guild_id),
        role = html_escape(&view.role_id),
        backup_display = backup_display,
        backup_value = html_escape(backup_value),
        scope = html_escape(view.scope),
        redirect = html_escape(view.redirect_uri),
        users_table = users_table,
    );

    admin_page("Dashboard", &body)
}

pub fn logs_page(entries: &[LogEntry]) -> String {
    let logs_html: Vec<String> = entries
        .iter()
        .map(|entry| {
            format!(
                r#"<div class="log-entry {}"><span class="time">{}</span> <span class="level">{}</span> <span class="target">[{}]</span> {}</div>"#,
                entry.level.to_lowercase(),
                entry.timestamp.format("%H:%M:%S%.3f"),
                entry.level,
                html_escape(&entry.target),
                html_escape(&entry.message)
            )
        })
        .collect();

    let body = format!(
        r#"<style>
        .log-container {{
            background: #0d0d1a;
            border-radius: 8px;
            padding: 1rem;
            font-family: 'SF Mono', 'Fira Code', monospace;
            font-size: 0.85rem;
            height: calc(100vh - 220px);
            overflow-y: auto;
            border: 1px solid rgba(255,255,255,0.1);
        }}
        .log-entry {{ padding: 0.25rem 0; white-space: pre-wrap; word-break: break-all; }}
        .log-entry .time {{ color: #666; }}
        .log-entry .target {{ color: #888; }}
        .log-entry.error {{ color: #e74c3c; }}
        .log-entry.warn {{ color: #f39c12; }}
        .log-entry.info .level {{ color: #3498db; }}
        .log-entry.debug {{ color: #888; }}
        </style>
        <h2 style="margin-bottom: 1rem;">Live Logs <span class="muted" id="status">Connecting...</span></h2>
        <div class="log-container" id="logs">
            {logs}
        </div>
        <script>
            const logs = document.getElementById('logs');
            const status = document.getElementById('status');

            function escapeHtml(text) {{
                const div = document.createElement('div');
                div.textContent = text;
                return div.innerHTML;
            }}

            const source = new EventSource('/admin/logs/stream');
            source.onopen = () => {{ status.textContent = 'Connected'; }};
            source.onerror = () => {{ status.textContent = 'Disconnected, reconnecting...'; }};
            source.onmessage = (event) => {{
                const entry = JSON.parse(event.data);
                const div = document.createElement('div');
                div.className = 'log-entry ' + entry.level.toLowerCase();
                div.innerHTML = '<span class="time">' + new Date(entry.timestamp).toLocaleTimeString() + '</span> ' +
                    '<span class="level">' + entry.level + '</span> ' +
                    '<span class="target">[' + escapeHtml(entry.target) + ']</span> ' +
                    escapeHtml(entry.message);
                logs.appendChild(div);
                while (logs.children.length > 500) {{
                    logs.removeChild(logs.firstChild);
                }}
                logs.scrollTop = logs.scrollHeight;
            }};
            logs.scrollTop = logs.scrollHeight;
        </script>"#,
        logs = logs_html.join("\n")
    );

    admin_page("Logs", &body)
}
