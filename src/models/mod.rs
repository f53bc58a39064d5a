pub mod catalog;
pub mod document;
pub mod extraction;
pub mod line_item;
pub mod price;
pub mod quote;
pub mod warning;

pub use catalog::{CatalogEntry, Material, MaterialMatch, Supplier, SupplierInfo};
pub use document::{Document, DocumentStatus, NewDocument, StatusChange};
pub use extraction::{ExtractedQuote, ExtractionPayload, ExtractionResult};
pub use line_item::{LineItem, LineItemEdit, LineItemFields, LineType, NewLineItem, ReviewLine};
pub use price::{CategorySummary, PriceFilter, PricePoint, PriceRow, SupplierPriceSummary, UNCATEGORIZED};
pub use quote::{ApprovalOutcome, NewQuote, Quote, QuoteDetail, QuoteFields, QuoteUpdate, RawExtraction};
pub use warning::{Severity, Warning, WarningCheck};
