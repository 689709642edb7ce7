use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::db::{
    connection::Database,
    helpers::{format_datetime, parse_datetime, to_i64, to_u32, to_u64},
    models::{NewSticker, Sticker, StickerStyle},
};
use crate::models::{BoundingBox, SegmentationResult};
use crate::poller::StickerSink;

const STICKER_COLUMNS: &str = "id, prompt, image, image_width, image_height, score,
     bbox_x_min, bbox_y_min, bbox_x_max, bbox_y_max,
     is_favorite, style, created_at, updated_at";

fn row_to_sticker(row: &Row) -> Result<Sticker> {
    let width: i64 = row.get("image_width")?;
    let height: i64 = row.get("image_height")?;
    let style: String = row.get("style")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    let corners: [Option<f64>; 4] = [
        row.get("bbox_x_min")?,
        row.get("bbox_y_min")?,
        row.get("bbox_x_max")?,
        row.get("bbox_y_max")?,
    ];
    let bounding_box = match corners {
        [Some(x_min), Some(y_min), Some(x_max), Some(y_max)] => Some(BoundingBox::from_array([
            x_min as f32,
            y_min as f32,
            x_max as f32,
            y_max as f32,
        ])),
        _ => None,
    };

    Ok(Sticker {
        id: row.get("id")?,
        prompt: row.get("prompt")?,
        image: row.get("image")?,
        image_width: to_u32(width, "image_width")?,
        image_height: to_u32(height, "image_height")?,
        score: row.get::<_, Option<f64>>("score")?.map(|score| score as f32),
        bounding_box,
        is_favorite: row.get::<_, i64>("is_favorite")? != 0,
        style: style.parse()?,
        tags: Vec::new(),
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

fn load_tags(conn: &Connection, sticker_id: &str) -> Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT tag FROM sticker_tags WHERE sticker_id = ?1 ORDER BY tag ASC")?;
    let tags = stmt
        .query_map(params![sticker_id], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(tags)
}

/// Runs a sticker SELECT and attaches each row's tags.
fn query_stickers(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Sticker>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut stickers = Vec::new();
    while let Some(row) = rows.next()? {
        let mut sticker = row_to_sticker(row)?;
        sticker.tags = load_tags(conn, &sticker.id)?;
        stickers.push(sticker);
    }
    Ok(stickers)
}

fn fetch_sticker(conn: &Connection, sticker_id: &str) -> Result<Option<Sticker>> {
    let sql = format!("SELECT {STICKER_COLUMNS} FROM stickers WHERE id = ?1");
    Ok(query_stickers(conn, &sql, params![sticker_id])?.into_iter().next())
}

/// Trims, drops blanks and duplicates, keeps first-seen order.
fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut cleaned: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim().to_lowercase();
        if !tag.is_empty() && !cleaned.contains(&tag) {
            cleaned.push(tag);
        }
    }
    cleaned
}

impl Database {
    pub async fn save_sticker(&self, sticker: NewSticker) -> Result<Sticker> {
        if sticker.image.is_empty() {
            bail!("refusing to save a sticker without image data");
        }

        self.execute(move |conn| {
            let id = Uuid::new_v4().to_string();
            let now = format_datetime(&Utc::now());
            let corners = sticker.bounding_box.map(BoundingBox::to_array);
            let corner = |index: usize| corners.map(|values| f64::from(values[index]));

            conn.execute(
                "INSERT INTO stickers (id, prompt, image, image_width, image_height, score,
                     bbox_x_min, bbox_y_min, bbox_x_max, bbox_y_max,
                     is_favorite, style, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0, ?11, ?12, ?12)",
                params![
                    id,
                    sticker.prompt,
                    sticker.image,
                    i64::from(sticker.image_width),
                    i64::from(sticker.image_height),
                    sticker.score.map(f64::from),
                    corner(0),
                    corner(1),
                    corner(2),
                    corner(3),
                    StickerStyle::default().as_str(),
                    now,
                ],
            )
            .context("failed to insert sticker")?;

            fetch_sticker(conn, &id)?.ok_or_else(|| anyhow!("sticker {id} not found after insert"))
        })
        .await
    }

    pub async fn get_sticker(&self, sticker_id: &str) -> Result<Option<Sticker>> {
        let sticker_id = sticker_id.to_string();
        self.execute(move |conn| fetch_sticker(conn, &sticker_id))
            .await
    }

    /// Newest first.
    pub async fn recent_stickers(&self, limit: u32) -> Result<Vec<Sticker>> {
        self.execute(move |conn| {
            let sql = format!(
                "SELECT {STICKER_COLUMNS} FROM stickers
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?1"
            );
            query_stickers(conn, &sql, params![i64::from(limit)])
        })
        .await
    }

    pub async fn favorite_stickers(&self) -> Result<Vec<Sticker>> {
        self.execute(|conn| {
            let sql = format!(
                "SELECT {STICKER_COLUMNS} FROM stickers
                 WHERE is_favorite = 1
                 ORDER BY created_at DESC, rowid DESC"
            );
            query_stickers(conn, &sql, [])
        })
        .await
    }

    /// Case-insensitive exact match on the prompt that produced the sticker.
    pub async fn stickers_by_prompt(&self, prompt: &str) -> Result<Vec<Sticker>> {
        let prompt = prompt.trim().to_string();
        self.execute(move |conn| {
            let sql = format!(
                "SELECT {STICKER_COLUMNS} FROM stickers
                 WHERE prompt = ?1 COLLATE NOCASE
                 ORDER BY created_at DESC, rowid DESC"
            );
            query_stickers(conn, &sql, params![prompt])
        })
        .await
    }

    /// Returns false when no sticker has this id.
    pub async fn set_favorite(&self, sticker_id: &str, favorite: bool) -> Result<bool> {
        let sticker_id = sticker_id.to_string();
        self.execute(move |conn| {
            let updated = conn.execute(
                "UPDATE stickers SET is_favorite = ?1, updated_at = ?2 WHERE id = ?3",
                params![favorite as i64, format_datetime(&Utc::now()), sticker_id],
            )?;
            Ok(updated > 0)
        })
        .await
    }

    pub async fn set_style(&self, sticker_id: &str, style: StickerStyle) -> Result<bool> {
        let sticker_id = sticker_id.to_string();
        self.execute(move |conn| {
            let updated = conn.execute(
                "UPDATE stickers SET style = ?1, updated_at = ?2 WHERE id = ?3",
                params![style.as_str(), format_datetime(&Utc::now()), sticker_id],
            )?;
            Ok(updated > 0)
        })
        .await
    }

    /// Replaces the sticker's tag set and returns the stored tags.
    pub async fn set_tags(&self, sticker_id: &str, tags: Vec<String>) -> Result<Vec<String>> {
        let sticker_id = sticker_id.to_string();
        let tags = normalize_tags(tags);
        self.execute(move |conn| {
            let tx = conn.transaction()?;

            let touched = tx.execute(
                "UPDATE stickers SET updated_at = ?1 WHERE id = ?2",
                params![format_datetime(&Utc::now()), sticker_id],
            )?;
            if touched == 0 {
                bail!("sticker {sticker_id} not found");
            }

            tx.execute(
                "DELETE FROM sticker_tags WHERE sticker_id = ?1",
                params![sticker_id],
            )?;
            {
                let mut insert =
                    tx.prepare("INSERT INTO sticker_tags (sticker_id, tag) VALUES (?1, ?2)")?;
                for tag in &tags {
                    insert.execute(params![sticker_id, tag])?;
                }
            }
            tx.commit().context("failed to commit sticker tags")?;

            load_tags(conn, &sticker_id)
        })
        .await
    }

    /// Tags go with it via ON DELETE CASCADE.
    pub async fn delete_sticker(&self, sticker_id: &str) -> Result<bool> {
        let sticker_id = sticker_id.to_string();
        self.execute(move |conn| {
            let deleted = conn.execute("DELETE FROM stickers WHERE id = ?1", params![sticker_id])?;
            Ok(deleted > 0)
        })
        .await
    }

    pub async fn sticker_count(&self) -> Result<u64> {
        self.execute(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM stickers", [], |row| row.get(0))?;
            to_u64(count, "sticker count")
        })
        .await
    }

    /// Most recent sticker saved for `prompt`, if any.
    pub async fn latest_for_prompt(&self, prompt: &str) -> Result<Option<Sticker>> {
        let prompt = prompt.trim().to_string();
        self.execute(move |conn| {
            let id: Option<String> = conn
                .query_row(
                    "SELECT id FROM stickers WHERE prompt = ?1 COLLATE NOCASE
                     ORDER BY created_at DESC, rowid DESC LIMIT 1",
                    params![prompt],
                    |row| row.get(0),
                )
                .optional()?;
            match id {
                Some(id) => fetch_sticker(conn, &id),
                None => Ok(None),
            }
        })
        .await
    }

    /// Drops everything but the newest `keep` stickers. Returns how many were removed.
    pub async fn prune_stickers(&self, keep: u64) -> Result<usize> {
        self.execute(move |conn| {
            let removed = conn.execute(
                "DELETE FROM stickers WHERE id NOT IN (
                     SELECT id FROM stickers ORDER BY created_at DESC, rowid DESC LIMIT ?1
                 ) AND is_favorite = 0",
                params![to_i64(keep)?],
            )?;
            Ok(removed)
        })
        .await
    }
}

#[async_trait]
impl StickerSink for Database {
    async fn save_result(&self, result: &SegmentationResult, prompt: &str) -> Result<String> {
        let sticker = NewSticker::from_result(result, prompt)
            .ok_or_else(|| anyhow!("result {} has no mask image to save", result.id()))?;
        let saved = self.save_sticker(sticker).await?;
        Ok(saved.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MaskImage;
    use tempfile::TempDir;

    fn open() -> (TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("stickers.db")).unwrap();
        (dir, db)
    }

    fn new_sticker(prompt: &str) -> NewSticker {
        NewSticker {
            prompt: prompt.to_string(),
            image: vec![0x89, b'P', b'N', b'G'],
            image_width: 64,
            image_height: 48,
            score: Some(0.87),
            bounding_box: Some(BoundingBox::from_array([1.0, 2.0, 30.0, 40.0])),
        }
    }

    #[tokio::test]
    async fn save_then_get_round_trips_fields() {
        let (_dir, db) = open();
        let saved = db.save_sticker(new_sticker("coffee cup")).await.unwrap();

        let loaded = db.get_sticker(&saved.id).await.unwrap().unwrap();
        assert_eq!(loaded.prompt, "coffee cup");
        assert_eq!(loaded.image, vec![0x89, b'P', b'N', b'G']);
        assert_eq!((loaded.image_width, loaded.image_height), (64, 48));
        assert!((loaded.score.unwrap() - 0.87).abs() < 1e-6);
        assert_eq!(
            loaded.bounding_box.map(BoundingBox::to_array),
            Some([1.0, 2.0, 30.0, 40.0])
        );
        assert!(!loaded.is_favorite);
        assert_eq!(loaded.style, StickerStyle::Original);
        assert!(loaded.tags.is_empty());
    }

    #[tokio::test]
    async fn recent_is_newest_first_and_limited() {
        let (_dir, db) = open();
        for prompt in ["a", "b", "c"] {
            db.save_sticker(new_sticker(prompt)).await.unwrap();
        }

        let recent = db.recent_stickers(2).await.unwrap();
        let prompts: Vec<_> = recent.iter().map(|s| s.prompt.as_str()).collect();
        assert_eq!(prompts, vec!["c", "b"]);
        assert_eq!(db.sticker_count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn favorites_and_prompt_queries() {
        let (_dir, db) = open();
        let cup = db.save_sticker(new_sticker("Cup")).await.unwrap();
        db.save_sticker(new_sticker("dog")).await.unwrap();
        db.save_sticker(new_sticker("cup")).await.unwrap();

        assert!(db.set_favorite(&cup.id, true).await.unwrap());
        assert!(!db.set_favorite("missing", true).await.unwrap());

        let favorites = db.favorite_stickers().await.unwrap();
        assert_eq!(favorites.len(), 1);
        assert_eq!(favorites[0].id, cup.id);

        let cups = db.stickers_by_prompt("  CUP ").await.unwrap();
        assert_eq!(cups.len(), 2);
        assert_eq!(
            db.latest_for_prompt("cup").await.unwrap().map(|s| s.prompt),
            Some("cup".to_string())
        );
    }

    #[tokio::test]
    async fn tags_are_replaced_and_normalized() {
        let (_dir, db) = open();
        let saved = db.save_sticker(new_sticker("plant")).await.unwrap();

        let tags = db
            .set_tags(&saved.id, vec![" Green ".into(), "".into(), "green".into(), "desk".into()])
            .await
            .unwrap();
        assert_eq!(tags, vec!["desk".to_string(), "green".to_string()]);

        db.set_tags(&saved.id, vec!["office".into()]).await.unwrap();
        let loaded = db.get_sticker(&saved.id).await.unwrap().unwrap();
        assert_eq!(loaded.tags, vec!["office".to_string()]);

        assert!(db.set_tags("missing", vec!["x".into()]).await.is_err());
    }

    #[tokio::test]
    async fn style_and_delete() {
        let (_dir, db) = open();
        let saved = db.save_sticker(new_sticker("lamp")).await.unwrap();
        db.set_tags(&saved.id, vec!["light".into()]).await.unwrap();

        assert!(db.set_style(&saved.id, StickerStyle::Neon).await.unwrap());
        let loaded = db.get_sticker(&saved.id).await.unwrap().unwrap();
        assert_eq!(loaded.style, StickerStyle::Neon);

        assert!(db.delete_sticker(&saved.id).await.unwrap());
        assert!(!db.delete_sticker(&saved.id).await.unwrap());
        assert!(db.get_sticker(&saved.id).await.unwrap().is_none());

        let orphaned: i64 = db
            .execute(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM sticker_tags", [], |row| row.get(0))?))
            .await
            .unwrap();
        assert_eq!(orphaned, 0);
    }

    #[tokio::test]
    async fn prune_keeps_newest_and_favorites() {
        let (_dir, db) = open();
        let oldest = db.save_sticker(new_sticker("one")).await.unwrap();
        db.save_sticker(new_sticker("two")).await.unwrap();
        db.save_sticker(new_sticker("three")).await.unwrap();
        db.set_favorite(&oldest.id, true).await.unwrap();

        let removed = db.prune_stickers(1).await.unwrap();
        assert_eq!(removed, 1);
        assert!(db.get_sticker(&oldest.id).await.unwrap().is_some());
        assert_eq!(db.sticker_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn empty_image_is_rejected() {
        let (_dir, db) = open();
        let mut sticker = new_sticker("void");
        sticker.image.clear();
        assert!(db.save_sticker(sticker).await.is_err());
    }

    #[tokio::test]
    async fn sink_saves_results_with_masks_only() {
        let (_dir, db) = open();
        let bare = SegmentationResult::new(Some("https://x/m.png".into()), Some(0.5), None);
        assert!(db.save_result(&bare, "mug").await.is_err());

        let with_mask = bare.with_mask_image(MaskImage::new(vec![9, 9, 9], 3, 1, true));
        let id = db.save_result(&with_mask, "mug").await.unwrap();
        let stored = db.get_sticker(&id).await.unwrap().unwrap();
        assert_eq!(stored.prompt, "mug");
        assert_eq!(stored.image, vec![9, 9, 9]);
    }
}
