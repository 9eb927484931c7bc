use std::fs;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;

use threadmem_core::threads::{ChatImport, Message, MessageFilter, Metadata, Thread};
use threadmem_core::{NewPost, NewThread, ThreadFilter, ThreadService};

#[derive(Parser)]
#[command(
    name = "threadmem",
    about = "Versioned conversation threads",
    long_about = "Create, append to, inspect and export persisted multi-role conversation threads."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Human, global = true)]
    pub format: OutputFormat,

    /// Enable debug logging
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Human,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create an empty thread
    Create {
        #[arg(long)]
        owner: Option<String>,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        public: bool,

        /// Register a role up front (repeatable)
        #[arg(long = "role")]
        roles: Vec<String>,

        /// Reject posts from roles that are not registered
        #[arg(long)]
        closed: bool,

        /// Thread metadata as a JSON object
        #[arg(long)]
        metadata: Option<String>,
    },

    /// Append a message to a thread
    Post {
        thread_id: String,

        #[arg(long)]
        role: String,

        #[arg(long, default_value = "")]
        text: String,

        /// File path, http(s) URL or data URI (repeatable)
        #[arg(long = "image")]
        images: Vec<String>,

        #[arg(long)]
        private: bool,
    },

    /// List threads matching the given filters
    List {
        #[arg(long)]
        owner: Option<String>,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        public: Option<bool>,
    },

    /// Show a thread and its messages
    Show {
        thread_id: String,

        /// Only messages from this role
        #[arg(long)]
        role: Option<String>,

        /// Hide private messages
        #[arg(long)]
        public_only: bool,
    },

    /// Print a thread in the `{"messages":[{role, content}]}` chat schema
    Export {
        thread_id: String,

        #[arg(long)]
        include_private: bool,
    },

    /// Remove a single message
    DeleteMessage { thread_id: String, message_id: String },

    /// Delete a thread together with its messages and stored images
    Delete { thread_id: String },

    /// Write an attached image to a file
    Image {
        thread_id: String,
        message_id: String,

        /// Position of the image within the message
        #[arg(long, default_value_t = 0)]
        index: usize,

        #[arg(long, short = 'o')]
        out: PathBuf,
    },

    /// Copy a thread under a new id
    Duplicate { thread_id: String },

    /// Build a new thread from a chat transcript file
    Import {
        file: PathBuf,

        #[arg(long)]
        owner: Option<String>,

        #[arg(long)]
        name: Option<String>,
    },
}

#[derive(Serialize)]
struct ThreadSummary<'a> {
    id: &'a str,
    owner_id: Option<&'a str>,
    name: Option<&'a str>,
    public: bool,
    version: &'a str,
    messages: usize,
}

impl<'a> From<&'a Thread> for ThreadSummary<'a> {
    fn from(thread: &'a Thread) -> Self {
        Self {
            id: thread.id(),
            owner_id: thread.owner_id(),
            name: thread.name(),
            public: thread.is_public(),
            version: thread.version(),
            messages: thread.all_messages().len(),
        }
    }
}

pub fn run(
    service: &ThreadService,
    command: Command,
    format: OutputFormat,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    match command {
        Command::Create {
            owner,
            name,
            public,
            roles,
            closed,
            metadata,
        } => {
            let metadata: Metadata = match metadata {
                Some(raw) => serde_json::from_str(&raw).context("metadata must be a JSON object")?,
                None => Metadata::new(),
            };
            let thread = service.create_thread(NewThread {
                owner_id: owner,
                name,
                public,
                metadata,
                roles,
                open_roles: !closed,
            })?;
            print_summary(out, format, &thread)
        }
        Command::Post {
            thread_id,
            role,
            text,
            images,
            private,
        } => {
            let mut thread = service.load(&thread_id)?;
            let mut post = NewPost::new(role, text);
            for image in images {
                post = post.with_image(image);
            }
            if private {
                post = post.private();
            }
            let message = service.post(&mut thread, post)?;
            match format {
                OutputFormat::Json => write_json(out, &message),
                OutputFormat::Human => {
                    writeln!(out, "{} (thread version {})", message.id, thread.version())?;
                    Ok(())
                }
            }
        }
        Command::List {
            owner,
            name,
            public,
        } => {
            let threads = service.find(&ThreadFilter {
                id: None,
                owner_id: owner,
                public,
                name,
            })?;
            match format {
                OutputFormat::Json => {
                    let summaries: Vec<ThreadSummary> = threads.iter().map(Into::into).collect();
                    write_json(out, &summaries)
                }
                OutputFormat::Human => {
                    for thread in &threads {
                        write_summary_line(out, thread)?;
                    }
                    Ok(())
                }
            }
        }
        Command::Show {
            thread_id,
            role,
            public_only,
        } => {
            let thread = service.load(&thread_id)?;
            let mut filter = if public_only {
                MessageFilter::public_only()
            } else {
                MessageFilter::default()
            };
            if let Some(role) = role {
                filter = filter.role(role);
            }
            let messages: Vec<&Message> = thread.messages(filter).collect();
            match format {
                OutputFormat::Json => write_json(
                    out,
                    &serde_json::json!({
                        "thread": ThreadSummary::from(&thread),
                        "messages": messages,
                    }),
                ),
                OutputFormat::Human => {
                    write_summary_line(out, &thread)?;
                    for message in messages {
                        write_message(out, message)?;
                    }
                    Ok(())
                }
            }
        }
        Command::Export {
            thread_id,
            include_private,
        } => {
            let thread = service.load(&thread_id)?;
            write_json(out, &thread.to_export_schema_with(include_private))
        }
        Command::DeleteMessage {
            thread_id,
            message_id,
        } => {
            let mut thread = service.load(&thread_id)?;
            service.delete_message(&mut thread, &message_id)?;
            print_summary(out, format, &thread)
        }
        Command::Delete { thread_id } => {
            service.delete(&thread_id)?;
            match format {
                OutputFormat::Json => write_json(out, &serde_json::json!({ "deleted": thread_id })),
                OutputFormat::Human => {
                    writeln!(out, "deleted {}", thread_id)?;
                    Ok(())
                }
            }
        }
        Command::Image {
            thread_id,
            message_id,
            index,
            out: path,
        } => {
            let thread = service.load(&thread_id)?;
            let message = thread
                .message(&message_id)
                .ok_or_else(|| anyhow!("message {} not found in thread {}", message_id, thread_id))?;
            let reference = message.images.get(index).ok_or_else(|| {
                anyhow!(
                    "message {} has {} image(s), no index {}",
                    message_id,
                    message.images.len(),
                    index
                )
            })?;
            let bytes = service.resolve_image(reference)?;
            fs::write(&path, &bytes).with_context(|| format!("writing {}", path.display()))?;
            match format {
                OutputFormat::Json => write_json(
                    out,
                    &serde_json::json!({
                        "id": reference.id(),
                        "mimeType": reference.mime_type(),
                        "bytes": bytes.len(),
                        "path": path,
                    }),
                ),
                OutputFormat::Human => {
                    writeln!(
                        out,
                        "{} ({}, {} bytes) -> {}",
                        reference.id(),
                        reference.mime_type(),
                        bytes.len(),
                        path.display()
                    )?;
                    Ok(())
                }
            }
        }
        Command::Duplicate { thread_id } => {
            let thread = service.load(&thread_id)?;
            let copy = service.duplicate(&thread)?;
            print_summary(out, format, &copy)
        }
        Command::Import { file, owner, name } => {
            let raw = fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let import: ChatImport = serde_json::from_str(&raw)
                .with_context(|| format!("parsing chat transcript {}", file.display()))?;
            let thread = service.import_chat(
                NewThread {
                    owner_id: owner,
                    name,
                    ..NewThread::default()
                },
                import,
            )?;
            print_summary(out, format, &thread)
        }
    }
}

fn write_json<T: Serialize>(out: &mut impl Write, value: &T) -> anyhow::Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

fn print_summary(out: &mut impl Write, format: OutputFormat, thread: &Thread) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => write_json(out, &ThreadSummary::from(thread)),
        OutputFormat::Human => write_summary_line(out, thread),
    }
}

fn write_summary_line(out: &mut impl Write, thread: &Thread) -> anyhow::Result<()> {
    writeln!(
        out,
        "{}  {}  owner={}  public={}  messages={}  version={}",
        thread.id(),
        thread.name().unwrap_or("-"),
        thread.owner_id().unwrap_or("-"),
        thread.is_public(),
        thread.all_messages().len(),
        thread.version(),
    )?;
    Ok(())
}

fn write_message(out: &mut impl Write, message: &Message) -> anyhow::Result<()> {
    let private = if message.private { " (private)" } else { "" };
    writeln!(out, "[{}]{} {}: {}", message.id, private, message.role, message.text)?;
    for image in &message.images {
        writeln!(out, "    image {} {}", image.id(), image.mime_type())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::sync::Arc;
    use threadmem_core::ImageStore;
    use threadmem_storage::SqliteThreadRepository;

    fn service(dir: &tempfile::TempDir) -> ThreadService {
        let repository = SqliteThreadRepository::open(&dir.path().join("cli.db"), 2).unwrap();
        ThreadService::new(Arc::new(repository), Arc::new(ImageStore::inline().unwrap()))
    }

    fn run_to_string(service: &ThreadService, args: &[&str]) -> String {
        let cli = Cli::try_parse_from(args).unwrap();
        let mut out = Vec::new();
        run(service, cli.command, cli.format, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_create_post_export() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir);

        let created = run_to_string(
            &service,
            &["threadmem", "create", "--owner", "u1", "--format", "json"],
        );
        let summary: serde_json::Value = serde_json::from_str(&created).unwrap();
        let thread_id = summary["id"].as_str().unwrap().to_string();

        run_to_string(&service, &["threadmem", "post", &thread_id, "--role", "user", "--text", "Hi"]);
        run_to_string(
            &service,
            &["threadmem", "post", &thread_id, "--role", "assistant", "--text", "Hello"],
        );

        let exported = run_to_string(&service, &["threadmem", "export", &thread_id]);
        let exported: serde_json::Value = serde_json::from_str(&exported).unwrap();
        assert_eq!(
            exported,
            serde_json::json!({"messages": [
                {"role": "user", "content": "Hi"},
                {"role": "assistant", "content": "Hello"}
            ]})
        );

        let listed = run_to_string(&service, &["threadmem", "list", "--owner", "u1"]);
        assert_eq!(listed.lines().count(), 1);
        assert!(listed.contains("messages=2"));
    }

    #[test]
    fn test_closed_thread_rejects_unknown_role() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir);
        let created = run_to_string(
            &service,
            &["threadmem", "create", "--role", "user", "--closed", "--format", "json"],
        );
        let summary: serde_json::Value = serde_json::from_str(&created).unwrap();
        let thread_id = summary["id"].as_str().unwrap();

        let cli = Cli::try_parse_from([
            "threadmem", "post", thread_id, "--role", "tool", "--text", "x",
        ])
        .unwrap();
        let mut out = Vec::new();
        assert!(run(&service, cli.command, cli.format, &mut out).is_err());
        assert!(out.is_empty());
    }

    #[test]
    fn test_import_file() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir);
        let transcript = dir.path().join("chat.json");
        fs::write(
            &transcript,
            r#"{"messages":[{"role":"system","content":"Be brief"},{"role":"user","content":[{"type":"text","text":"Hi"}]}]}"#,
        )
        .unwrap();

        let imported = run_to_string(
            &service,
            &["threadmem", "import", transcript.to_str().unwrap(), "--format", "json"],
        );
        let summary: serde_json::Value = serde_json::from_str(&imported).unwrap();
        assert_eq!(summary["messages"], 2);
    }
}
