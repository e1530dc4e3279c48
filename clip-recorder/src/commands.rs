//! Interactive commands read from stdin while recording.

/// One line of user input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Save,
    Start,
    Stop,
    Status,
    Retention(u32),
    Audio { microphone: bool, system_audio: bool },
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  save                          write the buffered history to a clip
  start                         resume capture
  stop                          pause capture (the buffer is kept)
  status                        show state, buffer fill and audio levels
  retention <secs>              keep the last 5-60 seconds
  audio <off|mic|system|both>   choose audio sources
  help                          show this list
  quit                          stop, finish pending saves and exit";

/// Parse a command line. Blank lines yield `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let argument = words.next();
    if let Some(extra) = words.next() {
        return Err(format!("unexpected argument '{}'", extra));
    }

    let command = match (verb.to_ascii_lowercase().as_str(), argument) {
        ("save" | "s", None) => Command::Save,
        ("start", None) => Command::Start,
        ("stop", None) => Command::Stop,
        ("status", None) => Command::Status,
        ("help" | "?", None) => Command::Help,
        ("quit" | "exit" | "q", None) => Command::Quit,
        ("retention", Some(secs)) => Command::Retention(
            secs.parse()
                .map_err(|_| format!("'{}' is not a number of seconds", secs))?,
        ),
        ("retention", None) => return Err("usage: retention <secs>".into()),
        ("audio", Some(selection)) => parse_audio(selection)?,
        ("audio", None) => return Err("usage: audio <off|mic|system|both>".into()),
        (verb, Some(_)) if matches!(verb, "save" | "s" | "start" | "stop" | "status" | "help" | "quit") => {
            return Err(format!("'{}' takes no arguments", verb))
        }
        (verb, _) => return Err(format!("unknown command '{}' (try 'help')", verb)),
    };
    Ok(Some(command))
}

fn parse_audio(selection: &str) -> Result<Command, String> {
    let (microphone, system_audio) = match selection.to_ascii_lowercase().as_str() {
        "off" | "none" => (false, false),
        "mic" => (true, false),
        "system" => (false, true),
        "both" => (true, true),
        other => return Err(format!("unknown audio selection '{}'", other)),
    };
    Ok(Command::Audio {
        microphone,
        system_audio,
    })
}
