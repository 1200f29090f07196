//! CXML response builder
//!
//! Builds the voice-control-markup document the CPaaS platform consumes.
//! Every builder path goes through quick-xml's writer, so text and attribute
//! content is always escaped and the document is well-formed for any input —
//! a malformed response breaks a live call.

use std::io::Cursor;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

/// Emitted when serialization itself fails; still a valid document so the
/// platform cleanly terminates the call.
const FALLBACK_HANGUP: &str =
    "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response><Hangup/></Response>";

/// One dialable endpoint inside a `<Dial>`.
#[derive(Debug, Clone, PartialEq)]
pub enum DialTarget {
    /// PSTN number, rendered as `<Number>`.
    Number(String),
    /// SIP URI, rendered as `<Sip>`.
    Sip(String),
    Conference(ConferenceJoin),
    Service(ServiceDial),
}

impl DialTarget {
    /// Route by the `sip:` prefix: SIP URIs become `<Sip>`, everything else
    /// `<Number>`.
    pub fn endpoint(target: impl Into<String>) -> Self {
        let target = target.into();
        if target.starts_with("sip:") || target.starts_with("sips:") {
            Self::Sip(target)
        } else {
            Self::Number(target)
        }
    }
}

/// `<Conference>` join with the room's configured flags.
#[derive(Debug, Clone, PartialEq)]
pub struct ConferenceJoin {
    pub name: String,
    pub max_participants: Option<u32>,
    pub start_on_enter: bool,
    pub end_on_exit: bool,
    pub muted: bool,
    pub announce_join_leave: bool,
    pub record: bool,
    pub wait_url: Option<String>,
}

impl ConferenceJoin {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_participants: None,
            start_on_enter: true,
            end_on_exit: false,
            muted: false,
            announce_join_leave: false,
            record: false,
            wait_url: None,
        }
    }
}

/// `<Service>` dial to an external AI/voice provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceDial {
    pub provider: String,
    /// Provider-side number or URL.
    pub destination: String,
    pub token: Option<String>,
    pub attributes: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dial {
    pub targets: Vec<DialTarget>,
    pub timeout_secs: Option<u32>,
    /// Callback URL invoked with the dial outcome (ring-group advancement).
    pub action: Option<String>,
    pub caller_id: Option<String>,
    pub trunk: Option<String>,
}

impl Dial {
    pub fn to_targets(targets: Vec<DialTarget>) -> Self {
        Self {
            targets,
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, secs: u32) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn with_action(mut self, url: impl Into<String>) -> Self {
        self.action = Some(url.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Verb {
    Say {
        text: String,
        voice: Option<String>,
        language: Option<String>,
    },
    Play {
        url: String,
    },
    Dial(Dial),
    Gather {
        action: String,
        timeout_secs: Option<u32>,
        finish_on_key: Option<char>,
        min_digits: Option<u32>,
        max_digits: Option<u32>,
        children: Vec<Verb>,
    },
    Redirect {
        url: String,
    },
    Voicemail {
        mailbox: String,
        transcribe: bool,
        callback_url: Option<String>,
    },
    Hangup,
}

/// Accumulates verbs and serializes them into one `<Response>` document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CxmlResponse {
    verbs: Vec<Verb>,
}

impl CxmlResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn say(mut self, text: impl Into<String>) -> Self {
        self.verbs.push(Verb::Say {
            text: text.into(),
            voice: None,
            language: None,
        });
        self
    }

    pub fn say_voice(
        mut self,
        text: impl Into<String>,
        voice: Option<String>,
        language: Option<String>,
    ) -> Self {
        self.verbs.push(Verb::Say {
            text: text.into(),
            voice,
            language,
        });
        self
    }

    pub fn play(mut self, url: impl Into<String>) -> Self {
        self.verbs.push(Verb::Play { url: url.into() });
        self
    }

    pub fn dial(mut self, dial: Dial) -> Self {
        self.verbs.push(Verb::Dial(dial));
        self
    }

    /// DTMF collection. `prompt` verbs are nested inside the Gather and play
    /// while digits are collected.
    pub fn gather(
        mut self,
        action: impl Into<String>,
        timeout_secs: Option<u32>,
        min_digits: Option<u32>,
        max_digits: Option<u32>,
        prompt: CxmlResponse,
    ) -> Self {
        self.verbs.push(Verb::Gather {
            action: action.into(),
            timeout_secs,
            finish_on_key: Some('#'),
            min_digits,
            max_digits,
            children: prompt.verbs,
        });
        self
    }

    pub fn redirect(mut self, url: impl Into<String>) -> Self {
        self.verbs.push(Verb::Redirect { url: url.into() });
        self
    }

    pub fn voicemail(
        mut self,
        mailbox: impl Into<String>,
        transcribe: bool,
        callback_url: Option<String>,
    ) -> Self {
        self.verbs.push(Verb::Voicemail {
            mailbox: mailbox.into(),
            transcribe,
            callback_url,
        });
        self
    }

    pub fn hangup(mut self) -> Self {
        self.verbs.push(Verb::Hangup);
        self
    }

    // Terminal outcomes the routing engine reaches for constantly

    pub fn busy() -> Self {
        Self::new().say("The line is busy. Please try again later.").hangup()
    }

    pub fn unavailable() -> Self {
        Self::new()
            .say("The party you are trying to reach is unavailable.")
            .hangup()
    }

    pub fn send_to_voicemail(mailbox: impl Into<String>) -> Self {
        Self::new()
            .say("Please leave a message after the tone.")
            .voicemail(mailbox, false, None)
    }

    pub fn simple_dial(target: impl Into<String>, timeout_secs: u32) -> Self {
        Self::new().dial(
            Dial::to_targets(vec![DialTarget::endpoint(target)]).with_timeout(timeout_secs),
        )
    }

    pub fn simple_hangup() -> Self {
        Self::new().hangup()
    }

    pub fn say_with_hangup(text: impl Into<String>) -> Self {
        Self::new().say(text).hangup()
    }

    /// Serialize to the CXML document string. Infallible from the caller's
    /// point of view: a writer error degrades to a bare hangup document.
    pub fn to_xml(&self) -> String {
        self.render().unwrap_or_else(|e| {
            tracing::error!(error = %e, "CXML serialization failed, emitting fallback hangup");
            FALLBACK_HANGUP.to_string()
        })
    }

    fn render(&self) -> quick_xml::Result<String> {
        let mut writer = Writer::new(Cursor::new(Vec::new()));
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        writer.write_event(Event::Start(BytesStart::new("Response")))?;
        for verb in &self.verbs {
            write_verb(&mut writer, verb)?;
        }
        writer.write_event(Event::End(BytesEnd::new("Response")))?;

        let bytes = writer.into_inner().into_inner();
        Ok(String::from_utf8(bytes).unwrap_or_else(|_| FALLBACK_HANGUP.to_string()))
    }
}

fn write_verb(writer: &mut Writer<Cursor<Vec<u8>>>, verb: &Verb) -> quick_xml::Result<()> {
    match verb {
        Verb::Say {
            text,
            voice,
            language,
        } => {
            let mut el = BytesStart::new("Say");
            if let Some(voice) = voice {
                el.push_attribute(("voice", voice.as_str()));
            }
            if let Some(language) = language {
                el.push_attribute(("language", language.as_str()));
            }
            writer.write_event(Event::Start(el))?;
            writer.write_event(Event::Text(BytesText::new(text)))?;
            writer.write_event(Event::End(BytesEnd::new("Say")))?;
        }
        Verb::Play { url } => {
            writer.write_event(Event::Start(BytesStart::new("Play")))?;
            writer.write_event(Event::Text(BytesText::new(url)))?;
            writer.write_event(Event::End(BytesEnd::new("Play")))?;
        }
        Verb::Dial(dial) => {
            let timeout = dial.timeout_secs.map(|t| t.to_string());
            let mut el = BytesStart::new("Dial");
            if let Some(ref timeout) = timeout {
                el.push_attribute(("timeout", timeout.as_str()));
            }
            if let Some(ref action) = dial.action {
                el.push_attribute(("action", action.as_str()));
            }
            if let Some(ref caller_id) = dial.caller_id {
                el.push_attribute(("callerId", caller_id.as_str()));
            }
            if let Some(ref trunk) = dial.trunk {
                el.push_attribute(("trunks", trunk.as_str()));
            }
            writer.write_event(Event::Start(el))?;
            for target in &dial.targets {
                write_dial_target(writer, target)?;
            }
            writer.write_event(Event::End(BytesEnd::new("Dial")))?;
        }
        Verb::Gather {
            action,
            timeout_secs,
            finish_on_key,
            min_digits,
            max_digits,
            children,
        } => {
            let timeout = timeout_secs.map(|t| t.to_string());
            let finish = finish_on_key.map(|k| k.to_string());
            let min = min_digits.map(|d| d.to_string());
            let max = max_digits.map(|d| d.to_string());

            let mut el = BytesStart::new("Gather");
            el.push_attribute(("action", action.as_str()));
            if let Some(ref timeout) = timeout {
                el.push_attribute(("timeout", timeout.as_str()));
            }
            if let Some(ref finish) = finish {
                el.push_attribute(("finishOnKey", finish.as_str()));
            }
            if let Some(ref min) = min {
                el.push_attribute(("minDigits", min.as_str()));
            }
            if let Some(ref max) = max {
                el.push_attribute(("maxDigits", max.as_str()));
            }
            writer.write_event(Event::Start(el))?;
            for child in children {
                write_verb(writer, child)?;
            }
            writer.write_event(Event::End(BytesEnd::new("Gather")))?;
        }
        Verb::Redirect { url } => {
            writer.write_event(Event::Start(BytesStart::new("Redirect")))?;
            writer.write_event(Event::Text(BytesText::new(url)))?;
            writer.write_event(Event::End(BytesEnd::new("Redirect")))?;
        }
        Verb::Voicemail {
            mailbox,
            transcribe,
            callback_url,
        } => {
            let mut el = BytesStart::new("Voicemail");
            el.push_attribute(("mailbox", mailbox.as_str()));
            if *transcribe {
                el.push_attribute(("transcribe", "true"));
            }
            if let Some(ref callback) = callback_url {
                el.push_attribute(("statusCallback", callback.as_str()));
            }
            writer.write_event(Event::Empty(el))?;
        }
        Verb::Hangup => {
            writer.write_event(Event::Empty(BytesStart::new("Hangup")))?;
        }
    }
    Ok(())
}

fn write_dial_target(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    target: &DialTarget,
) -> quick_xml::Result<()> {
    match target {
        DialTarget::Number(number) => {
            writer.write_event(Event::Start(BytesStart::new("Number")))?;
            writer.write_event(Event::Text(BytesText::new(number)))?;
            writer.write_event(Event::End(BytesEnd::new("Number")))?;
        }
        DialTarget::Sip(uri) => {
            writer.write_event(Event::Start(BytesStart::new("Sip")))?;
            writer.write_event(Event::Text(BytesText::new(uri)))?;
            writer.write_event(Event::End(BytesEnd::new("Sip")))?;
        }
        DialTarget::Conference(conf) => {
            let max = conf.max_participants.map(|m| m.to_string());
            let mut el = BytesStart::new("Conference");
            if let Some(ref max) = max {
                el.push_attribute(("maxParticipants", max.as_str()));
            }
            el.push_attribute((
                "startConferenceOnEnter",
                if conf.start_on_enter { "true" } else { "false" },
            ));
            el.push_attribute((
                "endConferenceOnExit",
                if conf.end_on_exit { "true" } else { "false" },
            ));
            if conf.muted {
                el.push_attribute(("muted", "true"));
            }
            if conf.announce_join_leave {
                el.push_attribute(("announceJoinLeave", "true"));
            }
            if conf.record {
                el.push_attribute(("record", "true"));
            }
            if let Some(ref wait_url) = conf.wait_url {
                el.push_attribute(("waitUrl", wait_url.as_str()));
            }
            writer.write_event(Event::Start(el))?;
            writer.write_event(Event::Text(BytesText::new(&conf.name)))?;
            writer.write_event(Event::End(BytesEnd::new("Conference")))?;
        }
        DialTarget::Service(service) => {
            let mut el = BytesStart::new("Service");
            el.push_attribute(("provider", service.provider.as_str()));
            if let Some(ref token) = service.token {
                el.push_attribute(("token", token.as_str()));
            }
            for (key, value) in &service.attributes {
                el.push_attribute((key.as_str(), value.as_str()));
            }
            writer.write_event(Event::Start(el))?;
            writer.write_event(Event::Text(BytesText::new(&service.destination)))?;
            writer.write_event(Event::End(BytesEnd::new("Service")))?;
        }
    }
    Ok(())
}
