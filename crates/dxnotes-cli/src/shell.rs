//! Line-oriented command loop.

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use dxnotes_core::guard::{AccessPolicy, NavigationDecision, RouteTable};
use dxnotes_core::models::{CodeRef, NewConsultation};
use dxnotes_core::{Config, SessionContext};

const HELP: &str = "\
Commands:
  login [username]                     log in (prompts for password)
  logout                               end the session
  refresh                              renew the access token now
  whoami                               show session state
  go <path>                            navigate to one of the views below
  search <chapter> [category] [sub]    look up diagnosis codes
  notes [email]                        list consultation notes
  note <code> <title> :: <content>     save a consultation note, e.g. note A01.4 Fever :: Stable
  help                                 show this help
  quit                                 exit";

pub struct Shell {
    ctx: SessionContext,
    config: Config,
    current_view: String,
    observer: Option<JoinHandle<()>>,
}

impl Shell {
    pub fn new(ctx: SessionContext, config: Config) -> Self {
        let current_view = config.landing_route.clone();
        Self {
            ctx,
            config,
            current_view,
            observer: None,
        }
    }

    /// Restore or establish a session, then settle on the first view
    pub async fn start(&mut self, username: Option<&str>) {
        let mut rx = self.ctx.session().subscribe();
        self.observer = Some(tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let authenticated = rx.borrow_and_update().is_authenticated();
                info!(authenticated, "Session state changed");
            }
        }));

        if !self.ctx.restore().await {
            let username = username
                .map(str::to_string)
                .or_else(|| self.config.last_username.clone());
            if let Some(username) = username {
                if let Err(e) = self.login(&username).await {
                    eprintln!("Error: {:#}", e);
                }
            }
        }

        let start = self.current_view.clone();
        self.navigate(&start);
    }

    pub async fn run(&mut self) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        self.prompt();

        while let Some(line) = lines.next_line().await.context("Failed to read command")? {
            let words: Vec<&str> = line.split_whitespace().collect();
            match self.dispatch(&words).await {
                Ok(true) => break,
                Ok(false) => {}
                Err(e) => eprintln!("Error: {:#}", e),
            }
            // Session may have ended as a side effect; re-check the view
            let view = self.current_view.clone();
            self.navigate(&view);
            self.prompt();
        }
        Ok(())
    }

    pub fn shutdown(&mut self) {
        self.ctx.teardown();
        if let Some(observer) = self.observer.take() {
            observer.abort();
        }
    }

    fn prompt(&self) {
        let who = self.ctx.session().identity().unwrap_or_else(|| {
            if self.ctx.session().is_authenticated() {
                "session".to_string()
            } else {
                "guest".to_string()
            }
        });
        eprint!("{} {}> ", who, self.current_view);
    }

    /// Returns true when the shell should exit
    async fn dispatch(&mut self, words: &[&str]) -> Result<bool> {
        let Some((&command, args)) = words.split_first() else {
            return Ok(false);
        };

        match command {
            "help" | "?" => self.help(),
            "quit" | "exit" => return Ok(true),
            "whoami" => self.whoami(),
            "login" => {
                let username = match args.first() {
                    Some(u) => u.to_string(),
                    None => self
                        .config
                        .last_username
                        .clone()
                        .context("Usage: login <username>")?,
                };
                self.login(&username).await?;
                let landing = self.config.landing_route.clone();
                self.navigate(&landing);
            }
            "logout" => {
                self.ctx.logout().await;
                println!("Logged out");
            }
            "refresh" => {
                self.ctx.refresh().await?;
                println!("Access token renewed");
            }
            "go" => {
                let path = args.first().context("Usage: go <path>")?;
                self.navigate(path);
            }
            "search" => self.search(args).await?,
            "notes" => self.notes(args).await?,
            "note" => self.save_note(args).await?,
            other => bail!("Unknown command '{}', try 'help'", other),
        }
        Ok(false)
    }

    async fn login(&mut self, username: &str) -> Result<()> {
        let password = rpassword::prompt_password(format!("Password for {}: ", username))
            .context("Failed to read password")?;
        self.ctx.login(username, &password).await?;
        println!("Logged in as {}", username);

        if self.config.last_username.as_deref() != Some(username) {
            self.config.last_username = Some(username.to_string());
            if let Err(e) = self.config.save() {
                warn!(error = %e, "Failed to save config");
            }
        }
        Ok(())
    }

    fn help(&self) {
        println!("{}", HELP);
        println!();
        print!("{}", format_views(self.ctx.guard().routes()));
    }

    fn whoami(&self) {
        let state = self.ctx.session().snapshot();
        match state.data() {
            Some(data) => println!(
                "Authenticated as {} since {}",
                data.identity.as_deref().unwrap_or("(restored session)"),
                data.authenticated_at.format("%Y-%m-%d %H:%M:%S UTC")
            ),
            None => println!("Not logged in"),
        }
    }

    fn navigate(&mut self, path: &str) {
        match self.ctx.guard().guard_path(path) {
            NavigationDecision::Allow => {
                if self.current_view != path {
                    println!("-> {}", path);
                }
                self.current_view = path.to_string();
            }
            NavigationDecision::Redirect { to, reason } => {
                println!("-> {} (redirected from {}: {:?})", to, path, reason);
                self.current_view = to;
            }
        }
    }

    async fn search(&self, args: &[&str]) -> Result<()> {
        let chapter = args.first().context("Usage: search <chapter> [category] [sub]")?;
        let category = args.get(1).copied().unwrap_or("");
        let subcategory = args.get(2).copied().unwrap_or("");

        let codes = self.ctx.api().search_diagnosis(chapter, category, subcategory).await?;
        for code in &codes {
            println!("{}", code.code_with_title());
        }
        println!("{} code(s)", codes.len());
        Ok(())
    }

    async fn notes(&self, args: &[&str]) -> Result<()> {
        let email = match args.first() {
            Some(email) => email.to_string(),
            None => self.ctx.session().identity().context("Usage: notes <email>")?,
        };

        let notes = self.ctx.api().list_consultations(&email).await?;
        for note in &notes {
            let codes: Vec<String> = note.codes.iter().map(|c| c.code()).collect();
            println!("#{} {} [{}]", note.note_id, note.title, codes.join(", "));
        }
        Ok(())
    }

    async fn save_note(&self, args: &[&str]) -> Result<()> {
        const USAGE: &str = "Usage: note <code> <title> :: <content>";
        let (code, rest) = args.split_first().context(USAGE)?;
        let split = rest.iter().position(|w| *w == "::").context(USAGE)?;
        let title = rest[..split].join(" ");
        let content = rest[split + 1..].join(" ");
        if title.is_empty() {
            bail!(USAGE);
        }

        let email = self
            .ctx
            .session()
            .identity()
            .context("Log in with a username before saving notes")?;
        let note = NewConsultation {
            email,
            title,
            content,
            codes: vec![parse_code(code)?],
        };

        let saved = self.ctx.api().save_consultation(&note).await?;
        println!("Saved note #{}", saved.note_id);
        Ok(())
    }
}

/// Parse `A01` or `A01.4` into its chapter, category and subcategory parts.
/// A missing subcategory is stored as `X`.
fn parse_code(code: &str) -> Result<CodeRef> {
    let code = code.trim().to_ascii_uppercase();
    let (head, sub) = match code.split_once('.') {
        Some((head, sub)) => (head, sub),
        None => (code.as_str(), "X"),
    };

    if head.len() != 3 || !head.is_ascii() || sub.len() != 1 {
        bail!("'{}' is not a diagnosis code like A01 or A01.4", code);
    }

    Ok(CodeRef {
        chapter_code: head[..1].to_string(),
        category_code: head[1..].to_string(),
        subcategory_code: sub.to_string(),
    })
}

fn format_views(routes: &RouteTable) -> String {
    let mut out = String::from("Views:\n");
    for route in routes.routes() {
        let access = match route.policy {
            AccessPolicy::Public => "anyone",
            AccessPolicy::RequiresAuth => "logged in",
            AccessPolicy::GuestOnly => "logged out",
        };
        out.push_str(&format!("  {:<36} {} ({})\n", route.path, route.name, access));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_code() {
        let code = parse_code("a01.4").unwrap();
        assert_eq!(code.chapter_code, "A");
        assert_eq!(code.category_code, "01");
        assert_eq!(code.subcategory_code, "4");

        let code = parse_code("B20").unwrap();
        assert_eq!(code.subcategory_code, "X");

        assert!(parse_code("A1").is_err());
        assert!(parse_code("A01.45").is_err());
        assert!(parse_code("").is_err());
    }

    #[test]
    fn test_format_views_lists_every_route() {
        let views = format_views(&RouteTable::standard("/signin"));
        assert!(views.starts_with("Views:\n"));
        assert_eq!(views.lines().count(), 4);
        assert!(views.contains("/signin"));
        assert!(views.contains("consultations (logged in)"));
        assert!(views.contains("login (logged out)"));
    }
}
