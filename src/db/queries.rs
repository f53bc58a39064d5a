use crate::models::{
    CatalogEntry, CategorySummary, Document, DocumentStatus, LineItem, LineType, NewDocument,
    NewLineItem, NewQuote, PriceFilter, PricePoint, PriceRow, Quote, QuoteUpdate, StatusChange,
    Supplier, SupplierInfo, SupplierPriceSummary, UNCATEGORIZED,
};
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgExecutor, Postgres, QueryBuilder};

const DOCUMENT_COLUMNS: &str = "id, organization_id, storage_path, file_name, status, error_message, \
     quote_id, created_at, started_at, completed_at";

const QUOTE_COLUMNS: &str = "id, document_id, supplier_id, quote_number, quote_date, project_name, \
     subtotal, delivery_cost, tax_amount, tax_rate, total_amount, currency, payment_terms, \
     valid_until, notes, extraction_confidence, raw_extraction, verified, verified_at, matched_at, \
     created_at, updated_at";

const LINE_ITEM_COLUMNS: &str = "id, quote_id, description, quantity, unit, unit_price, line_total, \
     line_type, discount_pct, discount_amount, category_hint, sort_order, effective_unit_price, \
     extraction_confidence, material_id, match_confidence";

/// 已审批 material 明细的公共 FROM/WHERE
const VERIFIED_LINES: &str = r#"
        FROM line_items li
        INNER JOIN quotes q ON q.id = li.quote_id
        LEFT JOIN suppliers s ON s.id = q.supplier_id
        LEFT JOIN materials m ON m.id = li.material_id
        LEFT JOIN material_categories c ON c.id = m.category_id
        WHERE q.verified = TRUE AND li.line_type = 'material'"#;

/// 插入文档 (pending)
pub async fn insert_document<'e, E: PgExecutor<'e>>(
    executor: E,
    document: &NewDocument,
) -> Result<Document, sqlx::Error> {
    sqlx::query_as::<_, Document>(&format!(
        r#"
        INSERT INTO documents (organization_id, storage_path, file_name, status)
        VALUES ($1, $2, $3, 'pending')
        RETURNING {}
        "#,
        DOCUMENT_COLUMNS
    ))
    .bind(document.organization_id)
    .bind(&document.storage_path)
    .bind(&document.file_name)
    .fetch_one(executor)
    .await
}

/// 查询文档
pub async fn get_document<'e, E: PgExecutor<'e>>(executor: E, id: i64) -> Result<Option<Document>, sqlx::Error> {
    sqlx::query_as::<_, Document>(&format!("SELECT {} FROM documents WHERE id = $1", DOCUMENT_COLUMNS))
        .bind(id)
        .fetch_optional(executor)
        .await
}

/// 查询并锁定文档行
pub async fn lock_document<'e, E: PgExecutor<'e>>(executor: E, id: i64) -> Result<Option<Document>, sqlx::Error> {
    sqlx::query_as::<_, Document>(&format!(
        "SELECT {} FROM documents WHERE id = $1 FOR UPDATE",
        DOCUMENT_COLUMNS
    ))
    .bind(id)
    .fetch_optional(executor)
    .await
}

/// 条件状态变更: 当前状态不在 `from` 中时不更新, 返回 None
pub async fn transition_document<'e, E: PgExecutor<'e>>(
    executor: E,
    id: i64,
    from: &[DocumentStatus],
    change: &StatusChange,
) -> Result<Option<Document>, sqlx::Error> {
    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE documents SET status = ");
    builder
        .push_bind(change.to)
        .push(", error_message = COALESCE(")
        .push_bind(change.error_message.clone())
        .push(", error_message), started_at = COALESCE(")
        .push_bind(change.started_at)
        .push(", started_at), completed_at = COALESCE(")
        .push_bind(change.completed_at)
        .push(", completed_at) WHERE id = ")
        .push_bind(id)
        .push(" AND status IN (");
    let mut statuses = builder.separated(", ");
    for status in from {
        statuses.push_bind(*status);
    }
    builder.push(") RETURNING ").push(DOCUMENT_COLUMNS);

    builder.build_query_as::<Document>().fetch_optional(executor).await
}

/// 指定状态下 started_at 早于给定时间的文档
pub async fn documents_started_before<'e, E: PgExecutor<'e>>(
    executor: E,
    status: DocumentStatus,
    before: DateTime<Utc>,
) -> Result<Vec<Document>, sqlx::Error> {
    sqlx::query_as::<_, Document>(&format!(
        "SELECT {} FROM documents WHERE status = $1 AND started_at < $2 ORDER BY id",
        DOCUMENT_COLUMNS
    ))
    .bind(status)
    .bind(before)
    .fetch_all(executor)
    .await
}

/// 指定状态下 created_at 早于给定时间的文档
pub async fn documents_created_before<'e, E: PgExecutor<'e>>(
    executor: E,
    status: DocumentStatus,
    before: DateTime<Utc>,
) -> Result<Vec<Document>, sqlx::Error> {
    sqlx::query_as::<_, Document>(&format!(
        "SELECT {} FROM documents WHERE status = $1 AND created_at < $2 ORDER BY id",
        DOCUMENT_COLUMNS
    ))
    .bind(status)
    .bind(before)
    .fetch_all(executor)
    .await
}

/// 写入抽取结果后推进文档状态
pub async fn complete_document<'e, E: PgExecutor<'e>>(
    executor: E,
    id: i64,
    next: DocumentStatus,
    quote_id: i64,
    completed_at: DateTime<Utc>,
) -> Result<Document, sqlx::Error> {
    sqlx::query_as::<_, Document>(&format!(
        r#"
        UPDATE documents SET status = $2, quote_id = $3, completed_at = $4
        WHERE id = $1
        RETURNING {}
        "#,
        DOCUMENT_COLUMNS
    ))
    .bind(id)
    .bind(next)
    .bind(quote_id)
    .bind(completed_at)
    .fetch_one(executor)
    .await
}

/// 按名称查找或创建供应商 (忽略大小写与首尾空白)
pub async fn upsert_supplier<'e, E: PgExecutor<'e>>(
    executor: E,
    info: &SupplierInfo,
) -> Result<Supplier, sqlx::Error> {
    sqlx::query_as::<_, Supplier>(
        r#"
        INSERT INTO suppliers (name, email, phone, address)
        VALUES (btrim($1), $2, $3, $4)
        ON CONFLICT ((lower(btrim(name)))) DO UPDATE SET name = suppliers.name
        RETURNING id, name, email, phone, address, created_at
        "#,
    )
    .bind(&info.name)
    .bind(&info.email)
    .bind(&info.phone)
    .bind(&info.address)
    .fetch_one(executor)
    .await
}

/// 插入草稿报价
pub async fn insert_quote<'e, E: PgExecutor<'e>>(
    executor: E,
    document_id: i64,
    supplier_id: Option<i64>,
    quote: &NewQuote,
) -> Result<Quote, sqlx::Error> {
    let f = &quote.fields;
    sqlx::query_as::<_, Quote>(&format!(
        r#"
        INSERT INTO quotes (
            document_id, supplier_id, quote_number, quote_date, project_name,
            subtotal, delivery_cost, tax_amount, tax_rate, total_amount,
            currency, payment_terms, valid_until, notes,
            extraction_confidence, raw_extraction
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        RETURNING {}
        "#,
        QUOTE_COLUMNS
    ))
    .bind(document_id)
    .bind(supplier_id)
    .bind(&f.quote_number)
    .bind(f.quote_date)
    .bind(&f.project_name)
    .bind(&f.subtotal)
    .bind(&f.delivery_cost)
    .bind(&f.tax_amount)
    .bind(&f.tax_rate)
    .bind(&f.total_amount)
    .bind(&f.currency)
    .bind(&f.payment_terms)
    .bind(f.valid_until)
    .bind(&f.notes)
    .bind(quote.extraction_confidence)
    .bind(Json(&quote.raw_extraction))
    .fetch_one(executor)
    .await
}

/// 查询报价
pub async fn get_quote<'e, E: PgExecutor<'e>>(executor: E, id: i64) -> Result<Option<Quote>, sqlx::Error> {
    sqlx::query_as::<_, Quote>(&format!("SELECT {} FROM quotes WHERE id = $1", QUOTE_COLUMNS))
        .bind(id)
        .fetch_optional(executor)
        .await
}

/// 查询并锁定报价行
pub async fn lock_quote<'e, E: PgExecutor<'e>>(executor: E, id: i64) -> Result<Option<Quote>, sqlx::Error> {
    sqlx::query_as::<_, Quote>(&format!("SELECT {} FROM quotes WHERE id = $1 FOR UPDATE", QUOTE_COLUMNS))
        .bind(id)
        .fetch_optional(executor)
        .await
}

/// 复核后更新报价头
pub async fn update_quote<'e, E: PgExecutor<'e>>(
    executor: E,
    id: i64,
    update: &QuoteUpdate,
) -> Result<(), sqlx::Error> {
    let f = &update.fields;
    sqlx::query(
        r#"
        UPDATE quotes SET
            quote_number = $2, quote_date = $3, project_name = $4,
            subtotal = $5, delivery_cost = $6, tax_amount = $7, tax_rate = $8, total_amount = $9,
            currency = $10, payment_terms = $11, valid_until = $12, notes = $13,
            extraction_confidence = $14, raw_extraction = $15, updated_at = now()
        WHERE id = $1 AND verified = FALSE
        "#,
    )
    .bind(id)
    .bind(&f.quote_number)
    .bind(f.quote_date)
    .bind(&f.project_name)
    .bind(&f.subtotal)
    .bind(&f.delivery_cost)
    .bind(&f.tax_amount)
    .bind(&f.tax_rate)
    .bind(&f.total_amount)
    .bind(&f.currency)
    .bind(&f.payment_terms)
    .bind(f.valid_until)
    .bind(&f.notes)
    .bind(update.extraction_confidence)
    .bind(Json(&update.raw_extraction))
    .execute(executor)
    .await?;
    Ok(())
}

/// 标记报价已审批
pub async fn mark_quote_verified<'e, E: PgExecutor<'e>>(
    executor: E,
    id: i64,
    at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE quotes SET verified = TRUE, verified_at = $2, updated_at = $2 WHERE id = $1")
        .bind(id)
        .bind(at)
        .execute(executor)
        .await?;
    Ok(())
}

/// 已审批但仍未写回匹配结果的报价
pub async fn unmatched_quotes_before<'e, E: PgExecutor<'e>>(
    executor: E,
    before: DateTime<Utc>,
) -> Result<Vec<i64>, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        "SELECT id FROM quotes WHERE verified = TRUE AND matched_at IS NULL AND verified_at < $1 ORDER BY id",
    )
    .bind(before)
    .fetch_all(executor)
    .await
}

pub async fn mark_quote_matched<'e, E: PgExecutor<'e>>(
    executor: E,
    id: i64,
    at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE quotes SET matched_at = $2 WHERE id = $1")
        .bind(id)
        .bind(at)
        .execute(executor)
        .await?;
    Ok(())
}

/// 查询报价明细 (按 sort_order)
pub async fn list_line_items<'e, E: PgExecutor<'e>>(executor: E, quote_id: i64) -> Result<Vec<LineItem>, sqlx::Error> {
    sqlx::query_as::<_, LineItem>(&format!(
        "SELECT {} FROM line_items WHERE quote_id = $1 ORDER BY sort_order, id",
        LINE_ITEM_COLUMNS
    ))
    .bind(quote_id)
    .fetch_all(executor)
    .await
}

/// 批量插入明细
pub async fn insert_line_items<'e, E: PgExecutor<'e>>(
    executor: E,
    quote_id: i64,
    items: &[NewLineItem],
) -> Result<(), sqlx::Error> {
    if items.is_empty() {
        return Ok(());
    }

    let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(
        "INSERT INTO line_items (
            quote_id, description, quantity, unit, unit_price, line_total, line_type,
            discount_pct, discount_amount, category_hint, sort_order,
            effective_unit_price, extraction_confidence
        ) ",
    );
    query_builder.push_values(items, |mut b, item| {
        let f = &item.fields;
        b.push_bind(quote_id)
            .push_bind(f.description.clone())
            .push_bind(f.quantity.clone())
            .push_bind(f.unit.clone())
            .push_bind(f.unit_price.clone())
            .push_bind(f.line_total.clone())
            .push_bind(f.line_type)
            .push_bind(f.discount_pct.clone())
            .push_bind(f.discount_amount.clone())
            .push_bind(f.category_hint.clone())
            .push_bind(f.sort_order)
            .push_bind(item.effective_unit_price.clone())
            .push_bind(item.extraction_confidence);
    });

    let result = query_builder.build().execute(executor).await?;
    tracing::debug!("inserted {} line items for quote {}", result.rows_affected(), quote_id);
    Ok(())
}

/// 更新一行明细; 复核修改不保留旧的匹配结果
pub async fn update_line_item<'e, E: PgExecutor<'e>>(
    executor: E,
    id: i64,
    quote_id: i64,
    item: &NewLineItem,
) -> Result<u64, sqlx::Error> {
    let f = &item.fields;
    let result = sqlx::query(
        r#"
        UPDATE line_items SET
            description = $3, quantity = $4, unit = $5, unit_price = $6, line_total = $7,
            line_type = $8, discount_pct = $9, discount_amount = $10, category_hint = $11,
            sort_order = $12, effective_unit_price = $13, extraction_confidence = $14,
            material_id = NULL, match_confidence = NULL
        WHERE id = $1 AND quote_id = $2
        "#,
    )
    .bind(id)
    .bind(quote_id)
    .bind(&f.description)
    .bind(&f.quantity)
    .bind(&f.unit)
    .bind(&f.unit_price)
    .bind(&f.line_total)
    .bind(f.line_type)
    .bind(&f.discount_pct)
    .bind(&f.discount_amount)
    .bind(&f.category_hint)
    .bind(f.sort_order)
    .bind(&item.effective_unit_price)
    .bind(item.extraction_confidence)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

/// 删除未在复核中提交的明细
pub async fn delete_line_items_except<'e, E: PgExecutor<'e>>(
    executor: E,
    quote_id: i64,
    keep: &[i64],
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM line_items WHERE quote_id = $1 AND NOT (id = ANY($2))")
        .bind(quote_id)
        .bind(keep)
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}

/// 写回单行匹配结果
pub async fn set_line_item_match<'e, E: PgExecutor<'e>>(
    executor: E,
    quote_id: i64,
    line_item_id: i64,
    material_id: Option<i64>,
    confidence: Option<f64>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE line_items SET material_id = $3, match_confidence = $4
        WHERE id = $2 AND quote_id = $1 AND line_type = $5
        "#,
    )
    .bind(quote_id)
    .bind(line_item_id)
    .bind(material_id)
    .bind(confidence)
    .bind(LineType::Material)
    .execute(executor)
    .await?;
    Ok(())
}

/// 目录快照: active 物料 + 已匹配明细数
pub async fn catalog_snapshot<'e, E: PgExecutor<'e>>(executor: E) -> Result<Vec<CatalogEntry>, sqlx::Error> {
    sqlx::query_as::<_, CatalogEntry>(
        r#"
        SELECT m.id, m.name, c.name AS category, m.synonyms, m.active,
               COUNT(li.id) AS match_count
        FROM materials m
        LEFT JOIN material_categories c ON c.id = m.category_id
        LEFT JOIN line_items li ON li.material_id = m.id
        WHERE m.active
        GROUP BY m.id, c.name
        ORDER BY m.id
        "#,
    )
    .fetch_all(executor)
    .await
}

/// ILIKE 子串模式, 转义通配符 (配合 `ESCAPE '\'`)
fn like_pattern(needle: &str) -> String {
    let escaped = needle.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
    format!("%{}%", escaped)
}

/// 已审批报价中的 material 明细价格
pub async fn verified_prices<'e, E: PgExecutor<'e>>(
    executor: E,
    filter: &PriceFilter,
) -> Result<Vec<PriceRow>, sqlx::Error> {
    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
        r#"
        SELECT li.id AS line_item_id, q.id AS quote_id, q.document_id, q.supplier_id,
               s.name AS supplier_name, li.material_id, m.name AS material_name,
               c.name AS category, li.description, li.quantity, li.unit, li.unit_price,
               li.effective_unit_price, q.quote_date, q.verified_at"#,
    );
    builder.push(VERIFIED_LINES);

    if let Some(material_id) = filter.material_id {
        builder.push(" AND li.material_id = ").push_bind(material_id);
    }
    if filter.matched_only {
        builder.push(" AND li.material_id IS NOT NULL");
    }
    if let Some(supplier_id) = filter.supplier_id {
        builder.push(" AND q.supplier_id = ").push_bind(supplier_id);
    }
    if let Some(category) = &filter.category {
        builder.push(" AND lower(c.name) = lower(").push_bind(category.clone()).push(")");
    }
    if let Some(description) = &filter.description {
        builder
            .push(" AND li.description ILIKE ")
            .push_bind(like_pattern(description))
            .push(r" ESCAPE '\'");
    }
    if let Some(from) = filter.from {
        builder.push(" AND q.quote_date >= ").push_bind(from);
    }
    if let Some(to) = filter.to {
        builder.push(" AND q.quote_date <= ").push_bind(to);
    }
    builder
        .push(" ORDER BY q.quote_date DESC NULLS LAST, li.id LIMIT ")
        .push_bind(filter.limit());

    builder.build_query_as::<PriceRow>().fetch_all(executor).await
}

/// 某物料全部已审批价格点, 按报价日期升序
pub async fn price_history<'e, E: PgExecutor<'e>>(
    executor: E,
    material_id: i64,
) -> Result<Vec<PricePoint>, sqlx::Error> {
    sqlx::query_as::<_, PricePoint>(&format!(
        r#"
        SELECT q.quote_date AS date, q.supplier_id, s.name AS supplier_name,
               li.effective_unit_price, li.unit, q.id AS quote_id
        {}
          AND li.material_id = $1
          AND li.effective_unit_price IS NOT NULL
        ORDER BY q.quote_date ASC NULLS LAST, q.id
        "#,
        VERIFIED_LINES
    ))
    .bind(material_id)
    .fetch_all(executor)
    .await
}

/// 某物料按供应商聚合, 最新价格取报价日期最近的一行
pub async fn supplier_price_summary<'e, E: PgExecutor<'e>>(
    executor: E,
    material_id: i64,
) -> Result<Vec<SupplierPriceSummary>, sqlx::Error> {
    sqlx::query_as::<_, SupplierPriceSummary>(&format!(
        r#"
        WITH priced AS (
            SELECT q.supplier_id, s.name AS supplier_name, li.effective_unit_price AS price,
                   q.quote_date, li.id AS line_item_id
            {}
              AND li.material_id = $1
              AND li.effective_unit_price IS NOT NULL
        ),
        latest AS (
            SELECT DISTINCT ON (supplier_id) supplier_id, supplier_name, price, quote_date
            FROM priced
            ORDER BY supplier_id, quote_date DESC NULLS LAST, line_item_id
        )
        SELECT p.supplier_id, l.supplier_name, COUNT(*) AS observations,
               MIN(p.price) AS min_price, ROUND(AVG(p.price), 4) AS avg_price,
               MAX(p.price) AS max_price, l.price AS latest_price, l.quote_date AS latest_date
        FROM priced p
        INNER JOIN latest l ON l.supplier_id IS NOT DISTINCT FROM p.supplier_id
        GROUP BY p.supplier_id, l.supplier_name, l.price, l.quote_date
        ORDER BY avg_price, p.supplier_id NULLS FIRST
        "#,
        VERIFIED_LINES
    ))
    .bind(material_id)
    .fetch_all(executor)
    .await
}

/// 按物料分类聚合全部已审批明细
pub async fn category_price_summary<'e, E: PgExecutor<'e>>(
    executor: E,
) -> Result<Vec<CategorySummary>, sqlx::Error> {
    sqlx::query_as::<_, CategorySummary>(&format!(
        r#"
        SELECT COALESCE(c.name, $1) AS category, COUNT(*) AS line_items,
               COUNT(DISTINCT li.material_id) AS materials,
               COUNT(DISTINCT q.supplier_id) AS suppliers,
               ROUND(AVG(li.effective_unit_price), 4) AS avg_effective_price
        {}
        GROUP BY 1
        ORDER BY 1
        "#,
        VERIFIED_LINES
    ))
    .bind(UNCATEGORIZED)
    .fetch_all(executor)
    .await
}

/// 已完成匹配但仍未映射到物料的明细
pub async fn unmatched_line_items<'e, E: PgExecutor<'e>>(executor: E, limit: i64) -> Result<Vec<LineItem>, sqlx::Error> {
    sqlx::query_as::<_, LineItem>(
        r#"
        SELECT li.id, li.quote_id, li.description, li.quantity, li.unit, li.unit_price,
               li.line_total, li.line_type, li.discount_pct, li.discount_amount,
               li.category_hint, li.sort_order, li.effective_unit_price,
               li.extraction_confidence, li.material_id, li.match_confidence
        FROM line_items li
        INNER JOIN quotes q ON q.id = li.quote_id
        WHERE q.verified = TRUE
          AND q.matched_at IS NOT NULL
          AND li.line_type = 'material'
          AND li.material_id IS NULL
        ORDER BY li.id
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(executor)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_pattern_escapes_wildcards_and_backslash() {
        assert_eq!(like_pattern("plywood"), "%plywood%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
        assert_eq!(like_pattern(r"C:\temp"), r"%C:\\temp%");
        // 末尾反斜杠不能吞掉结尾的 %
        assert_eq!(like_pattern("a\\"), "%a\\\\%");
    }
}
