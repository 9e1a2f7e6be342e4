use crate::backends::content::scan_operations;
use crate::error::IngestError;
use crate::extractor::{EmbeddedImage, TextBackend};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use std::collections::BTreeMap;
use std::path::Path;

/// Upper bound on `Parent` hops when looking up inherited resources.
const MAX_PAGE_TREE_DEPTH: usize = 32;

/// Text and image backend: lopdf's own text extraction plus XObject images.
pub struct LopdfTextBackend {
    document: Document,
    pages: BTreeMap<u32, ObjectId>,
}

impl LopdfTextBackend {
    pub fn open(path: &Path) -> Result<Self, IngestError> {
        let document = Document::load(path)?;
        Ok(Self::from_document(document))
    }

    pub fn from_document(document: Document) -> Self {
        let pages = document.get_pages();
        Self { document, pages }
    }

    fn page_id(&self, page_number: u32) -> Result<ObjectId, IngestError> {
        self.pages.get(&page_number).copied().ok_or_else(|| {
            IngestError::PdfParse(format!("page {page_number} is not in the page tree"))
        })
    }

    /// XObject streams by name, and whether they were inherited from an ancestor node.
    fn xobjects(&self, page_id: ObjectId) -> Result<(Vec<(String, &Stream)>, bool), IngestError> {
        let Some((resources, inherited)) = page_resources(&self.document, page_id)? else {
            return Ok((Vec::new(), false));
        };
        let Ok(xobjects) = resources.get(b"XObject") else {
            return Ok((Vec::new(), inherited));
        };
        let xobjects = resolve(&self.document, xobjects)?.as_dict()?;

        let mut streams = Vec::new();
        for (name, object) in xobjects.iter() {
            if let Ok(stream) = resolve(&self.document, object)?.as_stream() {
                streams.push((String::from_utf8_lossy(name).into_owned(), stream));
            }
        }
        Ok((streams, inherited))
    }
}

impl TextBackend for LopdfTextBackend {
    fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    fn page_text(&self, page_number: u32) -> Result<String, IngestError> {
        self.page_id(page_number)?;
        Ok(self.document.extract_text(&[page_number])?)
    }

    fn page_images(&self, page_number: u32) -> Result<Vec<EmbeddedImage>, IngestError> {
        let page_id = self.page_id(page_number)?;
        let layout = scan_operations(&self.document.get_and_decode_page_content(page_id)?.operations);

        let (xobjects, inherited) = self.xobjects(page_id)?;

        // Inherited resources are shared by sibling pages; keep only what this page draws.
        let images = xobjects
            .into_iter()
            .filter(|(name, stream)| {
                is_image(stream) && (!inherited || layout.placements.contains_key(name))
            })
            .map(|(name, stream)| {
                let (extension, data) = image_payload(stream);
                EmbeddedImage {
                    extension,
                    bbox: layout.placements.get(&name).copied(),
                    data,
                }
            })
            .collect();

        Ok(images)
    }
}

fn resolve<'a>(document: &'a Document, object: &'a Object) -> Result<&'a Object, IngestError> {
    match object {
        Object::Reference(id) => Ok(document.get_object(*id)?),
        other => Ok(other),
    }
}

/// The page's `Resources`, following `Parent` links for inherited entries.
fn page_resources(
    document: &Document,
    page_id: ObjectId,
) -> Result<Option<(&Dictionary, bool)>, IngestError> {
    let mut node_id = page_id;
    for _ in 0..MAX_PAGE_TREE_DEPTH {
        let node = document.get_dictionary(node_id)?;
        if let Ok(resources) = node.get(b"Resources") {
            let resources = resolve(document, resources)?.as_dict()?;
            return Ok(Some((resources, node_id != page_id)));
        }
        match node.get(b"Parent") {
            Ok(Object::Reference(parent)) => node_id = *parent,
            _ => return Ok(None),
        }
    }
    Ok(None)
}

fn is_image(stream: &Stream) -> bool {
    stream
        .dict
        .get(b"Subtype")
        .and_then(Object::as_name)
        .is_ok_and(|subtype| subtype == b"Image")
}

fn last_filter(stream: &Stream) -> Option<Vec<u8>> {
    match stream.dict.get(b"Filter").ok()? {
        Object::Name(name) => Some(name.clone()),
        Object::Array(filters) => filters.iter().rev().find_map(|filter| match filter {
            Object::Name(name) => Some(name.clone()),
            _ => None,
        }),
        _ => None,
    }
}

/// File extension and bytes to write for an image stream.
///
/// Self-describing encodings are written as-is; anything else is written as
/// decoded samples.
fn image_payload(stream: &Stream) -> (String, Option<Vec<u8>>) {
    let extension = match last_filter(stream).as_deref() {
        Some(b"DCTDecode") => "jpg",
        Some(b"JPXDecode") => "jp2",
        Some(b"JBIG2Decode") => "jb2",
        Some(b"CCITTFaxDecode") => "tiff",
        _ => "raw",
    };

    let data = if extension == "raw" {
        stream
            .decompressed_content()
            .unwrap_or_else(|_| stream.content.clone())
    } else {
        stream.content.clone()
    };

    let data = if data.is_empty() { None } else { Some(data) };
    (extension.to_string(), data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::{Content, Operation};
    use lopdf::dictionary;

    fn document_with_image(filter: &str, bytes: Vec<u8>) -> Document {
        let mut document = Document::with_version("1.5");
        let pages_id = document.new_object_id();
        let font_id = document.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let image_id = document.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 1,
                "Height" => 1,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => filter,
            },
            bytes,
        ));
        let resources_id = document.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
            "XObject" => dictionary! { "Im1" => image_id },
        });
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal("Outlook")]),
                Operation::new("ET", vec![]),
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![100.into(), 0.into(), 0.into(), 50.into(), 72.into(), 600.into()],
                ),
                Operation::new("Do", vec!["Im1".into()]),
                Operation::new("Q", vec![]),
            ],
        };
        let content_id =
            document.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = document.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        document.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );
        let catalog_id = document.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        document.trailer.set("Root", catalog_id);
        document
    }

    #[test]
    fn images_are_found_through_inherited_resources() {
        let backend =
            LopdfTextBackend::from_document(document_with_image("DCTDecode", vec![0xFF, 0xD8, 0xFF, 0xD9]));

        let images = backend.page_images(1).unwrap();

        assert_eq!(images.len(), 1);
        assert_eq!(images[0].extension, "jpg");
        assert_eq!(images[0].data.as_deref(), Some(&[0xFF, 0xD8, 0xFF, 0xD9][..]));
        let bbox = images[0].bbox.expect("image is drawn on the page");
        assert_eq!((bbox.x0, bbox.y0, bbox.x1, bbox.y1), (72.0, 600.0, 172.0, 650.0));
    }

    #[test]
    fn empty_image_stream_has_no_data() {
        let backend = LopdfTextBackend::from_document(document_with_image("JPXDecode", Vec::new()));

        let images = backend.page_images(1).unwrap();

        assert_eq!(images[0].extension, "jp2");
        assert!(images[0].data.is_none());
    }

    #[test]
    fn unknown_page_is_an_error() {
        let backend =
            LopdfTextBackend::from_document(document_with_image("DCTDecode", vec![1, 2, 3]));
        assert_eq!(backend.page_count(), 1);
        assert!(backend.page_text(2).is_err());
    }
}
