use anyhow::Result;
use std::path::Path;

/// Direct text extraction for formats that bypass the vision-OCR pipeline
/// (`.txt`, `.doc`, `.docx`). PDFs and images go through C2/C3 instead —
/// see `pdf::Rasterizer` and `ocr::cleaner`.
#[derive(Debug)]
pub struct ParsedDocument {
    pub content: String,
}

pub struct DocumentParser;

impl DocumentParser {
    pub fn parse(file_path: &Path) -> Result<ParsedDocument> {
        let extension = file_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        match extension.as_str() {
            "docx" | "doc" => Self::parse_docx(file_path),
            _ => Self::parse_text(file_path),
        }
    }

    fn parse_docx(file_path: &Path) -> Result<ParsedDocument> {
        use docx_rs::*;

        let data = std::fs::read(file_path)?;
        let docx = read_docx(&data)?;

        let mut content = String::new();

        for child in docx.document.children {
            if let DocumentChild::Paragraph(para) = child {
                for child in para.children {
                    if let ParagraphChild::Run(run) = child {
                        for child in run.children {
                            if let RunChild::Text(text) = child {
                                content.push_str(&text.text);
                            }
                        }
                    }
                }
                content.push('\n');
            }
        }

        Ok(ParsedDocument { content })
    }

    fn parse_text(file_path: &Path) -> Result<ParsedDocument> {
        let bytes = std::fs::read(file_path)?;
        let (content, _, had_errors) = encoding_rs::UTF_8.decode(&bytes);
        let content = if had_errors {
            let (gbk, _, _) = encoding_rs::GBK.decode(&bytes);
            gbk.into_owned()
        } else {
            content.into_owned()
        };

        Ok(ParsedDocument { content })
    }
}
