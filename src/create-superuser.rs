//! Provision an operator account directly in the MongoDB store, for
//! bootstrapping a deployment before anyone can log in.

use clap::{Arg, ArgAction, ArgMatches, Command};

use pesquisa_backend::{
    error::Error as BackendError,
    model::user::{AccountRequest, Credentials, NewUser},
    store::{MongoStore, UserDirectory},
};

const PROGRAM_NAME: &str = "create-superuser";

const ABOUT_TEXT: &str = "Create a superuser account for the questionnaire backend.

EXIT CODES:
     0: Account created.
     1: The username is already taken.
 Other: Error.";

const DB_URI: &str = "DB_URI";
const DB_NAME: &str = "DB_NAME";
const USERNAME: &str = "USERNAME";
const PASSWORD: &str = "PASSWORD";
const EMAIL: &str = "EMAIL";
const FULL_NAME: &str = "FULL_NAME";

/// Construct the CLI configuration.
fn cli() -> Command {
    // Make the build dirty when the toml changes.
    include_str!("../Cargo.toml");

    clap::command!(PROGRAM_NAME)
        .about(ABOUT_TEXT)
        .arg(
            Arg::new(DB_URI)
                .long("db-uri")
                .help("MongoDB connection string")
                .action(ArgAction::Set)
                .required(true),
        )
        .arg(
            Arg::new(DB_NAME)
                .long("db-name")
                .help("Database holding the accounts")
                .action(ArgAction::Set)
                .default_value("pesquisa"),
        )
        .arg(
            Arg::new(USERNAME)
                .help("Login name of the new account")
                .action(ArgAction::Set)
                .required(true),
        )
        .arg(
            Arg::new(PASSWORD)
                .long("password")
                .help("Password of the new account, at least 8 characters")
                .action(ArgAction::Set)
                .required(true),
        )
        .arg(
            Arg::new(EMAIL)
                .long("email")
                .action(ArgAction::Set)
                .default_value(""),
        )
        .arg(
            Arg::new(FULL_NAME)
                .long("full-name")
                .action(ArgAction::Set)
                .default_value(""),
        )
}

fn arg(args: &ArgMatches, id: &str) -> String {
    args.get_one::<String>(id).cloned().unwrap_or_default()
}

/// Create the account, returning the process exit code.
async fn run(args: &ArgMatches) -> u8 {
    let request = AccountRequest {
        credentials: Credentials {
            username: arg(args, USERNAME),
            password: arg(args, PASSWORD),
        },
        email: arg(args, EMAIL),
        full_name: arg(args, FULL_NAME),
        is_superuser: true,
    };
    let user = match NewUser::try_from(request) {
        Ok(user) => user,
        Err(err) => {
            eprintln!("{err}");
            return 2;
        }
    };

    let store = match MongoStore::connect(&arg(args, DB_URI), &arg(args, DB_NAME)).await {
        Ok(store) => store,
        Err(err) => {
            eprintln!("Failed to connect to database: {err}");
            return 3;
        }
    };

    match store.insert_user(user).await {
        Ok(user) => {
            println!("Created superuser '{}' with ID {}", user.username, user.id);
            0
        }
        Err(BackendError::Conflict(message)) => {
            eprintln!("{message}");
            1
        }
        Err(err) => {
            eprintln!("{err}");
            3
        }
    }
}

#[rocket::main]
async fn main() {
    let args = cli().get_matches();
    let exit_code = run(&args).await;
    std::process::exit(exit_code.into())
}
