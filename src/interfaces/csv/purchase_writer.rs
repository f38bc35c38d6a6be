use crate::domain::purchase::Purchase;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct PurchaseRow<'a> {
    id: String,
    subject: &'a str,
    item: &'a str,
    amount: String,
    status: String,
    reference: &'a str,
}

/// Writes ledger rows as CSV with the header `id,subject,item,amount,status,reference`.
pub struct PurchaseWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> PurchaseWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_purchases<'a, I>(&mut self, purchases: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a Purchase>,
    {
        let mut wrote_any = false;
        for purchase in purchases {
            self.writer.serialize(PurchaseRow {
                id: purchase.id.to_string(),
                subject: purchase.subject.as_str(),
                item: &purchase.item_id,
                amount: purchase.amount.normalize().to_string(),
                status: purchase.status.to_string(),
                reference: purchase.reference.as_deref().unwrap_or_default(),
            })?;
            wrote_any = true;
        }
        if !wrote_any {
            self.writer
                .write_record(["id", "subject", "item", "amount", "status", "reference"])?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
