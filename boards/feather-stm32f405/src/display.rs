#![deny(unsafe_code)]
//! 64x48 SSD1306 OLED showing two lines of text

use defmt::{info, warn, Debug2Format};
use embedded_graphics::mono_font::ascii::{FONT_10X20, FONT_6X10};
use embedded_graphics::mono_font::{MonoFont, MonoTextStyleBuilder};
use embedded_graphics::pixelcolor::BinaryColor;
use embedded_graphics::prelude::*;
use embedded_graphics::text::{Baseline, Text};
use hal_abstractions::{DisplayDriver, FontSize};
use ssd1306::mode::BufferedGraphicsMode;
use ssd1306::prelude::*;
use ssd1306::{I2CDisplayInterface, Ssd1306};

/// Gap between the two lines in pixels
const LINE_GAP: i32 = 2;

type Panel<I2C> =
    Ssd1306<I2CInterface<I2C>, DisplaySize64x48, BufferedGraphicsMode<DisplaySize64x48>>;

fn font(size: FontSize) -> &'static MonoFont<'static> {
    match size {
        FontSize::Small => &FONT_6X10,
        FontSize::Large => &FONT_10X20,
    }
}

/// OLED on the shared I2C bus
///
/// A panel that failed to initialise is dropped and every render becomes a
/// no-op, so a missing screen never stops the node.
pub struct OledDisplay<I2C> {
    panel: Option<Panel<I2C>>,
}

impl<I2C> OledDisplay<I2C>
where
    I2C: embedded_hal::i2c::I2c,
{
    pub fn new(i2c: I2C) -> Self {
        let interface = I2CDisplayInterface::new(i2c);
        let mut panel = Ssd1306::new(interface, DisplaySize64x48, DisplayRotation::Rotate0)
            .into_buffered_graphics_mode();

        let panel = match panel.init() {
            Ok(()) => {
                info!("SSD1306 initialized");
                Some(panel)
            }
            Err(e) => {
                warn!("SSD1306 init failed: {:?}", Debug2Format(&e));
                None
            }
        };
        Self { panel }
    }
}

impl<I2C> DisplayDriver for OledDisplay<I2C>
where
    I2C: embedded_hal::i2c::I2c,
{
    async fn render(&mut self, line1: &str, line2: &str, size: FontSize) {
        let Some(panel) = self.panel.as_mut() else {
            return;
        };

        let font = font(size);
        let style = MonoTextStyleBuilder::new()
            .font(font)
            .text_color(BinaryColor::On)
            .build();
        let second_line = font.character_size.height as i32 + LINE_GAP;

        panel.clear_buffer();
        let _ = Text::with_baseline(line1, Point::zero(), style, Baseline::Top).draw(panel);
        let _ = Text::with_baseline(line2, Point::new(0, second_line), style, Baseline::Top)
            .draw(panel);

        if let Err(e) = panel.flush() {
            warn!("Display flush failed: {:?}", Debug2Format(&e));
        }
    }
}
