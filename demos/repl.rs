use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use schemexp::builtinops::get_builtin_ops;
use schemexp::scheme::parse_program;
use schemexp::value::Procedure;
use schemexp::{Environment, Error, ParseErrorKind, Value, eval, parse};
use std::panic;
use std::process;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let result = panic::catch_unwind(run_repl);

    if let Err(panic_info) = result {
        eprintln!("The REPL encountered an unexpected error and must exit.");

        if let Some(msg) = panic_info.downcast_ref::<&str>() {
            eprintln!("Error: {msg}");
        } else if let Some(msg) = panic_info.downcast_ref::<String>() {
            eprintln!("Error: {msg}");
        } else {
            eprintln!("Error: Unknown panic occurred");
        }

        process::exit(1);
    }
}

/// Outcome of running one complete chunk of input
enum Step {
    Continue,
    Exit,
}

fn run_repl() {
    println!("schemexp interactive evaluator");
    println!("Enter S-expressions like: (define (square x) (* x x))");
    println!("Type :help for more commands, or Ctrl+D to exit.");
    println!();

    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(err) => {
            eprintln!("Could not initialize REPL: {err}");
            process::exit(1);
        }
    };
    let env = Environment::new();
    let mut pending = String::new();

    loop {
        let prompt = if pending.is_empty() { "schemexp> " } else { "      ... " };
        match rl.readline(prompt) {
            Ok(line) => {
                if pending.is_empty() {
                    match line.trim() {
                        "" => continue,
                        ":help" => {
                            print_help();
                            continue;
                        }
                        ":env" => {
                            print_environment(&env);
                            continue;
                        }
                        ":quit" | ":exit" => {
                            println!("Goodbye!");
                            break;
                        }
                        _ => {}
                    }
                }

                pending.push_str(&line);
                pending.push('\n');

                // Keep reading while a datum is still open
                let datums = match parse_program(&pending) {
                    Err(Error::Parse(err)) if err.kind == ParseErrorKind::Incomplete => continue,
                    other => other,
                };
                let _ = rl.add_history_entry(pending.trim_end());
                pending.clear();

                match datums {
                    Ok(datums) => {
                        if let Step::Exit = run_datums(&datums, &env) {
                            println!("Goodbye!");
                            break;
                        }
                    }
                    Err(e) => println!("Error: {e}"),
                }
            }

            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                println!("Error: {err:?}");
                break;
            }
        }
    }
}

fn run_datums(datums: &[schemexp::Syntax], env: &Environment) -> Step {
    for datum in datums {
        let result = parse(datum, env).and_then(|expr| eval(&expr, env));
        match result {
            Ok(Value::Terminate) => return Step::Exit,
            // Nothing to show for define, set!, display and friends
            Ok(Value::Void) => {}
            Ok(value) => println!("{value}"),
            Err(e) => {
                println!("Error: {e}");
                break;
            }
        }
    }
    Step::Continue
}

fn print_help() {
    println!("Commands:");
    println!("  :help      - Show this help message");
    println!("  :env       - Show current environment bindings");
    println!("  :quit      - Exit the interpreter");
    println!("  :exit      - Exit the interpreter");
    println!("  (exit)     - Exit from Scheme code");
    println!("  Ctrl+D     - Exit the interpreter");
    println!();
    println!("Special forms: quote if lambda define begin cond let letrec set!");
    println!("Primitives (exact integers and rationals):");
    let names: Vec<&str> = get_builtin_ops().iter().map(|op| op.scheme_id).collect();
    for row in names.chunks(8) {
        println!("  {}", row.join(" "));
    }
    println!();
    println!("Examples:");
    println!("  (define (fact n) (if (= n 0) 1 (* n (fact (- n 1)))))");
    println!("  (fact 10)");
    println!("  (/ 1 3)");
    println!("  '(1 2 . 3)");
    println!();
    println!("Set RUST_LOG=schemexp=debug to trace definitions and assignments.");
}

fn print_environment(env: &Environment) {
    let bindings = env.get_all_bindings();

    if bindings.is_empty() {
        println!("Environment is empty.");
        return;
    }

    println!("Environment bindings ({} total):", bindings.len());
    println!();

    // Separate procedures from plain data
    let mut procedures = Vec::new();
    let mut data = Vec::new();

    for (name, value) in bindings {
        let signature = match &value {
            Value::Procedure(procedure) => Some(match procedure.as_ref() {
                Procedure::Closure { params, .. } => format!("({name} {})", params.join(" ")),
                Procedure::Builtin(op) => format!("{name} = {}", op.scheme_id),
            }),
            _ => None,
        };
        match signature {
            Some(signature) => procedures.push(signature),
            None => data.push((name, value)),
        }
    }

    if !procedures.is_empty() {
        println!("Procedures ({}):", procedures.len());
        for signature in procedures {
            println!("  {signature}");
        }
        println!();
    }

    if !data.is_empty() {
        println!("Values ({}):", data.len());
        for (name, value) in data {
            println!("  {name} = {value}");
        }
    }
}
