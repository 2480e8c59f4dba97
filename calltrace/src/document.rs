//! # Trace documents
//!
//! A [`TraceDocument`] is the finished call tree in a form that no longer
//! references the tracer's arena: threads under the root, methods nested
//! under threads and under each other, children in call order.
//!
//! ## Console form
//!
//! ```text
//! root
//! -thread id=1, time=300ms
//! ---method name=main, time=300ms, package=app, paramscount=0
//! -----method name=load, time=100ms, package=app::store, paramscount=1
//! ```
//!
//! Each nesting level below the first adds two dashes.
//!
//! ## XML form
//!
//! ```xml
//! <?xml version="1.0" encoding="utf-8"?>
//! <root>
//!   <thread time="300" id="1">
//!     <method time="300" package="app" paramscount="0" name="main">
//!       <method time="100" package="app::store" paramscount="1" name="load"/>
//!     </method>
//!   </thread>
//! </root>
//! ```
//!
//! Attribute names and order are fixed. A parameter count the tracer could
//! not determine is written as `-1`.
//!
//! ## JSON form
//!
//! The serde representation of [`TraceDocument`].

use std::{
    borrow::Cow,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use quick_xml::{
    Reader, Writer,
    events::{BytesDecl, BytesEnd, BytesStart, Event},
};
use serde::{Deserialize, Serialize};

use crate::error::{DocumentError, ExportError};

/// File written by an export when no path is supplied.
pub const DEFAULT_EXPORT_FILE: &str = "ResultXML.xml";

/// Sentinel written for an unknown parameter count.
pub const UNKNOWN_PARAMS: i64 = -1;

/// Structured export format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    /// The `<root>/<thread>/<method>` XML schema.
    #[default]
    Xml,
    /// Serialised [`TraceDocument`].
    Json,
}

impl ExportFormat {
    /// Guess the format from a file extension; anything but `.json` is XML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ExportFormat::Json,
            _ => ExportFormat::Xml,
        }
    }
}

/// A snapshot of the whole call tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceDocument {
    /// Traced threads, in the order they first began a call.
    pub threads: Vec<ThreadRecord>,
}

/// One thread's call history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadRecord {
    /// Tracer-assigned thread id.
    pub id: u64,
    /// Accumulated time of the thread's top-level calls.
    pub time_ms: u64,
    /// Top-level calls made on this thread.
    pub methods: Vec<MethodRecord>,
}

/// One traced call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodRecord {
    /// Routine name.
    pub name: String,
    /// Owning module path.
    pub package: String,
    /// Declared parameter count, if known.
    pub params_count: Option<usize>,
    /// Elapsed time; zero while the call is still open.
    pub time_ms: u64,
    /// Calls made from inside this one.
    pub children: Vec<MethodRecord>,
}

impl TraceDocument {
    /// Number of method records across all threads.
    pub fn method_count(&self) -> usize {
        fn count(methods: &[MethodRecord]) -> usize {
            methods.iter().map(|m| 1 + count(&m.children)).sum()
        }
        self.threads.iter().map(|t| count(&t.methods)).sum()
    }

    /// Look up a thread record by id.
    pub fn thread(&self, id: u64) -> Option<&ThreadRecord> {
        self.threads.iter().find(|t| t.id == id)
    }

    /// Write the console form.
    pub fn render_console<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "root")?;
        for thread in &self.threads {
            writeln!(out, "-thread id={}, time={}ms", thread.id, thread.time_ms)?;
            render_methods(out, &thread.methods, 3)?;
        }
        Ok(())
    }

    /// Console form as a string.
    pub fn to_console_string(&self) -> String {
        let mut buf = Vec::new();
        // Writing into a Vec cannot fail.
        let _ = self.render_console(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Encode as an XML document.
    pub fn to_xml(&self) -> Result<Vec<u8>, quick_xml::Error> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
        writer.write_event(Event::Start(BytesStart::new("root")))?;
        for thread in &self.threads {
            let time = thread.time_ms.to_string();
            let id = thread.id.to_string();
            let element = BytesStart::new("thread")
                .with_attributes([("time", time.as_str()), ("id", id.as_str())]);
            if thread.methods.is_empty() {
                writer.write_event(Event::Empty(element))?;
            } else {
                writer.write_event(Event::Start(element))?;
                write_methods(&mut writer, &thread.methods)?;
                writer.write_event(Event::End(BytesEnd::new("thread")))?;
            }
        }
        writer.write_event(Event::End(BytesEnd::new("root")))?;
        Ok(writer.into_inner())
    }

    /// Encode in the given format.
    pub fn encode(&self, format: ExportFormat) -> Result<Vec<u8>, ExportError> {
        match format {
            ExportFormat::Xml => Ok(self.to_xml()?),
            ExportFormat::Json => Ok(serde_json::to_vec_pretty(self)?),
        }
    }

    /// Encode and write to `path`, creating missing parent directories.
    pub fn save(&self, path: &Path, format: ExportFormat) -> Result<PathBuf, ExportError> {
        let bytes = self.encode(format)?;
        let io_err = |source| ExportError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(path, bytes).map_err(io_err)?;
        Ok(path.to_path_buf())
    }

    /// Decode the XML form.
    pub fn from_xml_str(xml: &str) -> Result<Self, DocumentError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut document = TraceDocument::default();
        let mut seen_root = false;
        // Open `<method>` elements, innermost last.
        let mut open_methods: Vec<MethodRecord> = Vec::new();
        let mut open_thread: Option<ThreadRecord> = None;

        loop {
            match reader.read_event()? {
                Event::Start(e) => match e.name().as_ref() {
                    b"root" if !seen_root => seen_root = true,
                    b"thread" if seen_root && open_thread.is_none() => {
                        open_thread = Some(parse_thread(&e)?);
                    }
                    b"method" if open_thread.is_some() => open_methods.push(parse_method(&e)?),
                    other => return Err(unexpected(other)),
                },
                Event::Empty(e) => match e.name().as_ref() {
                    b"root" if !seen_root => seen_root = true,
                    b"thread" if seen_root && open_thread.is_none() => {
                        document.threads.push(parse_thread(&e)?);
                    }
                    b"method" if open_thread.is_some() => {
                        let method = parse_method(&e)?;
                        attach_method(&mut open_methods, &mut open_thread, method);
                    }
                    other => return Err(unexpected(other)),
                },
                Event::End(e) => match e.name().as_ref() {
                    b"method" => {
                        let method = open_methods.pop().ok_or_else(|| {
                            DocumentError::Malformed("unbalanced </method>".to_string())
                        })?;
                        attach_method(&mut open_methods, &mut open_thread, method);
                    }
                    b"thread" => {
                        if !open_methods.is_empty() {
                            return Err(DocumentError::Malformed(
                                "</thread> closes an open <method>".to_string(),
                            ));
                        }
                        let thread = open_thread.take().ok_or_else(|| {
                            DocumentError::Malformed("unbalanced </thread>".to_string())
                        })?;
                        document.threads.push(thread);
                    }
                    b"root" => {}
                    other => return Err(unexpected(other)),
                },
                Event::Eof => break,
                _ => {}
            }
        }

        if !seen_root {
            return Err(DocumentError::Malformed("missing <root> element".to_string()));
        }
        if open_thread.is_some() || !open_methods.is_empty() {
            return Err(DocumentError::Malformed("unexpected end of document".to_string()));
        }
        Ok(document)
    }

    /// Decode the JSON form.
    pub fn from_json_str(json: &str) -> Result<Self, DocumentError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read a document from disk, choosing the format by extension.
    pub fn load(path: &Path) -> Result<Self, DocumentError> {
        let contents = fs::read_to_string(path).map_err(|source| DocumentError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        match ExportFormat::from_path(path) {
            ExportFormat::Xml => Self::from_xml_str(&contents),
            ExportFormat::Json => Self::from_json_str(&contents),
        }
    }
}

fn render_methods<W: Write>(out: &mut W, methods: &[MethodRecord], dashes: usize) -> io::Result<()> {
    for method in methods {
        writeln!(
            out,
            "{:->dashes$}method name={}, time={}ms, package={}, paramscount={}",
            "",
            method.name,
            method.time_ms,
            method.package,
            params_attr(method.params_count),
        )?;
        render_methods(out, &method.children, dashes + 2)?;
    }
    Ok(())
}

fn write_methods(
    writer: &mut Writer<Vec<u8>>,
    methods: &[MethodRecord],
) -> Result<(), quick_xml::Error> {
    for method in methods {
        let time = method.time_ms.to_string();
        let params = params_attr(method.params_count).to_string();
        let element = BytesStart::new("method").with_attributes([
            ("time", time.as_str()),
            ("package", method.package.as_str()),
            ("paramscount", params.as_str()),
            ("name", method.name.as_str()),
        ]);
        if method.children.is_empty() {
            writer.write_event(Event::Empty(element))?;
        } else {
            writer.write_event(Event::Start(element))?;
            write_methods(writer, &method.children)?;
            writer.write_event(Event::End(BytesEnd::new("method")))?;
        }
    }
    Ok(())
}

fn params_attr(params_count: Option<usize>) -> i64 {
    params_count
        .and_then(|n| i64::try_from(n).ok())
        .unwrap_or(UNKNOWN_PARAMS)
}

fn attach_method(
    open_methods: &mut [MethodRecord],
    open_thread: &mut Option<ThreadRecord>,
    method: MethodRecord,
) {
    if let Some(parent) = open_methods.last_mut() {
        parent.children.push(method);
    } else if let Some(thread) = open_thread {
        thread.methods.push(method);
    }
}

fn parse_thread(element: &BytesStart<'_>) -> Result<ThreadRecord, DocumentError> {
    let mut id = None;
    let mut time_ms = None;
    for attr in element.attributes() {
        let attr = attr?;
        let value = attr.unescape_value()?;
        match attr.key.as_ref() {
            b"id" => id = Some(parse_number::<u64>("id", &value)?),
            b"time" => time_ms = Some(parse_number::<u64>("time", &value)?),
            _ => {}
        }
    }
    Ok(ThreadRecord {
        id: required("thread", "id", id)?,
        time_ms: required("thread", "time", time_ms)?,
        methods: Vec::new(),
    })
}

fn parse_method(element: &BytesStart<'_>) -> Result<MethodRecord, DocumentError> {
    let mut name = None;
    let mut package = None;
    let mut params = None;
    let mut time_ms = None;
    for attr in element.attributes() {
        let attr = attr?;
        let value = attr.unescape_value()?;
        match attr.key.as_ref() {
            b"name" => name = Some(value.into_owned()),
            b"package" => package = Some(value.into_owned()),
            b"paramscount" => params = Some(parse_number::<i64>("paramscount", &value)?),
            b"time" => time_ms = Some(parse_number::<u64>("time", &value)?),
            _ => {}
        }
    }
    let params = required("method", "paramscount", params)?;
    Ok(MethodRecord {
        name: required("method", "name", name)?,
        package: required("method", "package", package)?,
        params_count: usize::try_from(params).ok(),
        time_ms: required("method", "time", time_ms)?,
        children: Vec::new(),
    })
}

fn parse_number<T: std::str::FromStr>(attr: &str, value: &Cow<'_, str>) -> Result<T, DocumentError> {
    value.trim().parse().map_err(|_| {
        DocumentError::Malformed(format!("attribute `{attr}` is not a number: {value:?}"))
    })
}

fn required<T>(element: &str, attr: &str, value: Option<T>) -> Result<T, DocumentError> {
    value.ok_or_else(|| DocumentError::Malformed(format!("<{element}> is missing `{attr}`")))
}

fn unexpected(name: &[u8]) -> DocumentError {
    DocumentError::Malformed(format!(
        "unexpected element <{}>",
        String::from_utf8_lossy(name)
    ))
}
