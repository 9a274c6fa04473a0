use std::io::{BufRead, Write};
use std::sync::Arc;

use grantline::{ChatEvent, ChatSession, FileTranscriptStore, LlmClient, Role};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let user_id = std::env::args().nth(1).unwrap_or_else(|| "local".to_string());

    let client = match LlmClient::from_config() {
        Ok(client) => client,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    let store = match FileTranscriptStore::from_data_dir() {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Failed to open transcript store: {}", e);
            std::process::exit(1);
        }
    };

    let session = ChatSession::open(&user_id, Arc::new(client), Arc::new(store)).await;

    for message in session.messages() {
        match message.role {
            Role::User => println!("you: {}", message.content),
            Role::Assistant => println!("assistant: {}", message.content),
        }
    }

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();

    loop {
        print!("> ");
        let _ = stdout.flush();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                eprintln!("Failed to read input: {}", e);
                break;
            }
        }

        let line = line.trim();
        if line == "exit" || line == "quit" {
            break;
        }

        let Some(mut events) = session.send(line) else {
            continue;
        };

        print!("assistant: ");
        let _ = stdout.flush();
        while let Some(event) = events.recv().await {
            match event {
                ChatEvent::Delta(fragment) => {
                    print!("{}", fragment);
                    let _ = stdout.flush();
                }
                ChatEvent::Completed(_) => println!(),
                ChatEvent::Failed(message) => {
                    println!();
                    eprintln!("{}", message);
                }
            }
        }
    }
}
