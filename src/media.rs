//! Media-type lookup: HTTP `Content-Type` / `Accept` values → pandoc format tokens.
//!
//! The table is static and deliberately small. Each entry names the token the
//! converter understands, the file extension used for workspace files, and
//! whether the format can be read, written, or both.

/// A document format known to the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Format {
    /// Token passed to the converter's `-f` / `-t` options.
    pub token: &'static str,
    /// Extension used for files of this format inside a workspace.
    pub extension: &'static str,
    pub readable: bool,
    pub writable: bool,
}

impl Format {
    const fn rw(token: &'static str, extension: &'static str) -> Self {
        Self {
            token,
            extension,
            readable: true,
            writable: true,
        }
    }

    const fn read_only(token: &'static str, extension: &'static str) -> Self {
        Self {
            token,
            extension,
            readable: true,
            writable: false,
        }
    }

    const fn write_only(token: &'static str, extension: &'static str) -> Self {
        Self {
            token,
            extension,
            readable: false,
            writable: true,
        }
    }

    /// LaTeX-family sources go straight to the compiler when PDF is requested.
    pub fn is_latex(&self) -> bool {
        self.token == LATEX.token
    }

    pub fn is_pdf(&self) -> bool {
        self.token == PDF.token
    }
}

/// The intermediate format used when PDF is requested from a non-LaTeX source.
pub const LATEX: Format = Format::rw("latex", "tex");

pub const PDF: Format = Format::write_only("pdf", "pdf");

const TABLE: &[(&str, Format)] = &[
    ("text/markdown", Format::rw("markdown", "md")),
    ("text/x-markdown", Format::rw("markdown", "md")),
    ("text/html", Format::rw("html", "html")),
    ("application/xhtml+xml", Format::rw("html", "html")),
    ("application/x-latex", LATEX),
    ("application/x-tex", LATEX),
    ("text/x-tex", LATEX),
    ("text/x-latex", LATEX),
    ("application/pdf", PDF),
    (
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        Format::rw("docx", "docx"),
    ),
    ("application/vnd.oasis.opendocument.text", Format::rw("odt", "odt")),
    ("application/epub+zip", Format::rw("epub", "epub")),
    ("application/rtf", Format::rw("rtf", "rtf")),
    ("text/rtf", Format::rw("rtf", "rtf")),
    ("text/plain", Format::write_only("plain", "txt")),
    ("text/x-rst", Format::rw("rst", "rst")),
    ("text/org", Format::rw("org", "org")),
    ("text/x-textile", Format::rw("textile", "textile")),
    ("text/x-mediawiki", Format::rw("mediawiki", "wiki")),
    ("application/docbook+xml", Format::rw("docbook", "xml")),
    ("application/x-ipynb+json", Format::rw("ipynb", "ipynb")),
    ("application/json", Format::rw("json", "json")),
    ("text/csv", Format::read_only("csv", "csv")),
    ("text/asciidoc", Format::write_only("asciidoc", "adoc")),
];

/// Strip parameters and whitespace, lowercase, and take the first entry of
/// a comma-separated list: `"Text/HTML; q=0.9, */*"` → `"text/html"`.
pub fn essence(header_value: &str) -> String {
    header_value
        .split(',')
        .next()
        .unwrap_or("")
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

/// Look up the format for a raw header value.
pub fn lookup(header_value: &str) -> Option<Format> {
    let essence = essence(header_value);
    TABLE
        .iter()
        .find(|(media_type, _)| *media_type == essence)
        .map(|(_, format)| *format)
}
