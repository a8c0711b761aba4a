use anyhow::{Context, Result};
use clap::Parser;
use crossterm::event::{self, DisableMouseCapture, EnableMouseCapture, Event};
use crossterm::execute;
use ratatui::layout::Rect;
use ratatui::DefaultTerminal;
use std::fs::File;
use std::sync::Arc;
use std::time::{Duration, Instant};
use venue_map::api::{spawn_startup, ApiLoader, Backend, FileBackend, HttpBackend};
use venue_map::app::App;
use venue_map::config::{Args, Config};
use venue_map::scenario::Location;
use venue_map::ui;

fn init_logging(args: &Args) -> Result<()> {
    let file = File::create(&args.log_file)
        .with_context(|| format!("Failed to create log file {}", args.log_file.display()))?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Pipe(Box::new(file)))
        .init();
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args)?;
    let config = Config::load(&args)?;

    let backend: Arc<dyn Backend> = match &args.mock {
        Some(dir) => {
            log::info!("serving API payloads from {}", dir.display());
            Arc::new(FileBackend::new(dir))
        }
        None => {
            log::info!("using backend {}", config.api.base_url);
            Arc::new(HttpBackend::new(&config.api.base_url, config.timeout()))
        }
    };
    let startup = spawn_startup(backend.clone());
    let mut app = App::new(
        &config,
        Location::parse(&args.url),
        Box::new(ApiLoader::new(backend)),
        startup,
    );

    // Initialize terminal
    let mut terminal = ratatui::init();
    terminal.clear()?;

    // Enable mouse capture
    execute!(std::io::stdout(), EnableMouseCapture)?;

    // Run the app
    let result = run(&mut terminal, &mut app);

    // Disable mouse capture and restore terminal
    let _ = execute!(std::io::stdout(), DisableMouseCapture);
    ratatui::restore();

    // Shareable link for the final view
    println!("{}", app.view.location());
    result
}

fn run(terminal: &mut DefaultTerminal, app: &mut App) -> Result<()> {
    let mut last_frame = Instant::now();

    // Main loop
    loop {
        let size = terminal.size()?;
        app.sync_layout(Rect::new(0, 0, size.width, size.height));

        // Draw
        terminal.draw(|frame| ui::render(frame, &app.view, app.style, app.mouse_pos, app.time_input.as_deref()))?;

        // Handle events with ~60fps target
        if event::poll(Duration::from_millis(16))? {
            match event::read()? {
                Event::Key(key) => app.handle_key(key),
                Event::Mouse(mouse) => app.handle_mouse(mouse),
                // Layout is recomputed from the new size on the next iteration
                Event::Resize(_, _) => {}
                _ => {}
            }
        }

        let now = Instant::now();
        app.tick(now - last_frame);
        last_frame = now;

        if app.should_quit {
            break;
        }
    }

    Ok(())
}
