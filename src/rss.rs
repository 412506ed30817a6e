use quick_xml::events::Event;
use quick_xml::reader::Reader;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("XML parse error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("invalid text content: {0}")]
    Text(String),

    #[error("document has no root element")]
    Empty,

    #[error("document ended before <{0}> was closed")]
    Truncated(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RssDocument {
    pub channels: Vec<Channel>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Channel {
    pub title: String,
    pub link: String,
    pub description: String,
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Item {
    pub title: String,
    pub link: String,
    pub pub_date: String,
    pub guid: String,
    pub description: String,
}

impl RssDocument {
    pub fn item_count(&self) -> usize {
        self.channels.iter().map(|c| c.items.len()).sum()
    }
}

impl Channel {
    fn set_field(&mut self, name: &str, value: String) {
        match name {
            "title" => self.title = value,
            "link" => self.link = value,
            "description" => self.description = value,
            _ => {}
        }
    }
}

impl Item {
    fn set_field(&mut self, name: &str, value: String) {
        match name {
            "title" => self.title = value,
            "link" => self.link = value,
            "pubDate" => self.pub_date = value,
            "guid" => self.guid = value,
            "description" => self.description = value,
            _ => {}
        }
    }
}

/// Decode a syndication document from raw bytes.
///
/// Only `<channel>` children of the root element and `<item>` children of a
/// channel are read. Field values are kept as raw strings with surrounding
/// whitespace removed; an absent field decodes to an empty string and a
/// repeated field keeps its last value.
pub fn decode(xml: &[u8]) -> Result<RssDocument, DecodeError> {
    let mut reader = Reader::from_reader(xml);

    let mut document = RssDocument::default();
    let mut buf = Vec::new();

    // Open elements, root first
    let mut path: Vec<String> = Vec::new();
    let mut saw_root = false;
    let mut channel: Option<Channel> = None;
    let mut item: Option<Item> = None;
    let mut text = String::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                saw_root = true;

                match (path.len(), name.as_str()) {
                    (1, "channel") => channel = Some(Channel::default()),
                    (2, "item") if path[1] == "channel" => item = Some(Item::default()),
                    _ => {}
                }

                path.push(name);
                text.clear();
            }
            Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                saw_root = true;

                match path.len() {
                    1 if name == "channel" => document.channels.push(Channel::default()),
                    2 if path[1] == "channel" => {
                        if let Some(ch) = channel.as_mut() {
                            if name == "item" {
                                ch.items.push(Item::default());
                            } else {
                                ch.set_field(&name, String::new());
                            }
                        }
                    }
                    3 if path[2] == "item" => {
                        if let Some(it) = item.as_mut() {
                            it.set_field(&name, String::new());
                        }
                    }
                    _ => {}
                }
            }
            Event::Text(e) => {
                let unescaped = e
                    .unescape()
                    .map_err(|err| DecodeError::Text(err.to_string()))?;
                text.push_str(&unescaped);
            }
            Event::CData(e) => {
                text.push_str(&String::from_utf8_lossy(&e));
            }
            Event::End(_) => {
                let name = path.pop().unwrap_or_default();
                let value = std::mem::take(&mut text).trim().to_string();

                match path.len() {
                    1 if name == "channel" => {
                        if let Some(ch) = channel.take() {
                            document.channels.push(ch);
                        }
                    }
                    2 if path[1] == "channel" => {
                        if name == "item" {
                            if let (Some(ch), Some(it)) = (channel.as_mut(), item.take()) {
                                ch.items.push(it);
                            }
                        } else if let Some(ch) = channel.as_mut() {
                            ch.set_field(&name, value);
                        }
                    }
                    3 if path[2] == "item" => {
                        if let Some(it) = item.as_mut() {
                            it.set_field(&name, value);
                        }
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !saw_root {
        return Err(DecodeError::Empty);
    }
    if let Some(open) = path.pop() {
        return Err(DecodeError::Truncated(open));
    }

    Ok(document)
}
