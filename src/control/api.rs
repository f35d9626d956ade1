use crate::effects::db_to_gain;
use crate::frame::AudioFrame;
use crate::{ChannelStatus, MixerContext, MixerError, MixerStatus};

/// Build a status snapshot of the mixer and every live channel.
pub fn status(ctx: &MixerContext) -> MixerStatus {
    let capacity = ctx.output_capacity().max(1);
    let channels: Vec<ChannelStatus> =
        ctx.channels().iter().map(|channel| channel.status()).collect();
    MixerStatus {
        sample_rate_hz: ctx.sample_rate(),
        blocksize: ctx.blocksize(),
        prebuffer_ms: ctx.prebuffer_ms(),
        state: ctx.state(),
        manually_muted: ctx.is_manually_muted(),
        fast_forward: ctx.fast_forward_mode_enabled(),
        master_volume: ctx.master_volume(),
        compressor: ctx.compressor_enabled(),
        crossfeed: ctx.crossfeed_preset().to_string(),
        reverb: ctx.reverb_preset().to_string(),
        chorus: ctx.chorus_preset().to_string(),
        queue_fill: ctx.queued_frames() as f32 / capacity as f32,
        peak: ctx.master_peak(),
        channels,
    }
}

/// Set a channel's user volume in decibels on both sides.
pub fn set_user_volume_db(ctx: &MixerContext, name: &str, gain_db: f32) -> Result<(), MixerError> {
    let channel = ctx
        .find_channel(name)
        .ok_or_else(|| MixerError::UnknownChannel(name.to_string()))?;
    channel.set_user_volume(AudioFrame::splat(db_to_gain(gain_db)));
    Ok(())
}

/// Enable or disable a channel.
pub fn set_enabled(ctx: &MixerContext, name: &str, enabled: bool) -> Result<(), MixerError> {
    let channel = ctx
        .find_channel(name)
        .ok_or_else(|| MixerError::UnknownChannel(name.to_string()))?;
    channel.enable(enabled);
    Ok(())
}

/// Advance to the next reverb preset and return its name.
pub fn cycle_reverb(ctx: &MixerContext) -> &'static str {
    let next = ctx.reverb_preset().next();
    ctx.set_reverb_preset(next);
    next.as_str()
}

/// Advance to the next chorus preset and return its name.
pub fn cycle_chorus(ctx: &MixerContext) -> &'static str {
    let next = ctx.chorus_preset().next();
    ctx.set_chorus_preset(next);
    next.as_str()
}

/// Advance to the next crossfeed preset and return its name.
pub fn cycle_crossfeed(ctx: &MixerContext) -> &'static str {
    let next = ctx.crossfeed_preset().next();
    ctx.set_crossfeed_preset(next);
    next.as_str()
}
