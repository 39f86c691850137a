//! `banner` module: a static informational screen
//!
//! Never reports state, so it only appears through idle cycling or as the
//! target screen of a rule.

use serde::Deserialize;

use crate::render::RenderTarget;

use super::{Module, ModuleContext, ModuleError};

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
struct BannerSettings {
    title: Option<String>,
    lines: Vec<String>,
}

/// Static title and text lines
#[derive(Debug)]
pub struct BannerModule {
    title: String,
    lines: Vec<String>,
    shown_for: f64,
}

impl BannerModule {
    /// Build from a `settings` table
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::InvalidSettings`] if the table does not fit.
    pub fn from_settings(slug: &str, settings: &toml::Table) -> Result<Self, ModuleError> {
        let parsed: BannerSettings = toml::Value::Table(settings.clone())
            .try_into()
            .map_err(|e: toml::de::Error| ModuleError::InvalidSettings {
                slug: slug.to_string(),
                message: e.to_string(),
            })?;
        Ok(Self {
            title: parsed.title.unwrap_or_else(|| slug.to_uppercase()),
            lines: parsed.lines,
            shown_for: 0.0,
        })
    }
}

impl Module for BannerModule {
    fn on_show(&mut self, _ctx: &mut ModuleContext) -> Result<(), ModuleError> {
        self.shown_for = 0.0;
        Ok(())
    }

    fn update(&mut self, dt: f64, _ctx: &mut ModuleContext) -> Result<(), ModuleError> {
        self.shown_for += dt;
        Ok(())
    }

    fn render(&mut self, target: &mut dyn RenderTarget, ctx: &ModuleContext) -> Result<(), ModuleError> {
        let (columns, rows) = target.size();
        target.put_str(0, 0, &ctx.app().alert().title);

        let offset = columns.saturating_sub(self.title.chars().count()) / 2;
        target.put_str(offset, 2, &self.title);
        for (i, line) in self.lines.iter().enumerate() {
            target.put_str(0, 4 + i, line);
        }
        if rows > 0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let secs = self.shown_for.max(0.0) as u64;
            target.put_str(0, rows - 1, &format!("on screen {secs}s"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbitration::ReportBoard;
    use crate::bus::EventBus;
    use crate::clock::SystemClock;
    use crate::config::CoreSettings;
    use crate::context::{AppContext, ThemeColors};
    use crate::render::TextFrame;

    #[test]
    fn test_renders_title_lines_and_time() {
        let table: toml::Table = "title = \"NEO\"\nlines = [\"3 objects today\"]".parse().unwrap();
        let mut banner = BannerModule::from_settings("neo", &table).unwrap();
        let board = ReportBoard::new(SystemClock::shared(), 0.0);
        let mut ctx = ModuleContext::new(
            "neo",
            table,
            AppContext::shared(CoreSettings::default(), ThemeColors::default()),
            EventBus::new(),
            board.reporter("neo"),
        );

        banner.on_show(&mut ctx).unwrap();
        banner.update(2.5, &mut ctx).unwrap();
        let mut frame = TextFrame::new(20, 8);
        banner.render(&mut frame, &ctx).unwrap();

        assert_eq!(frame.line(2), "        NEO");
        assert!(frame.contains("3 objects today"));
        assert_eq!(frame.line(7), "on screen 2s");
        assert!(board.get("neo").is_none());
    }

    #[test]
    fn test_default_title_is_slug() {
        let banner = BannerModule::from_settings("clock", &toml::Table::new()).unwrap();
        assert_eq!(banner.title, "CLOCK");
    }
}
