use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, spanned::Spanned, Ident, ItemFn, LitStr};

/// Test attribute used across the crate.
///
/// - `#[rxnotify_macro::test]` on a sync fn expands to a plain `#[test]`.
/// - On an async fn the body runs on a current-thread tokio runtime inside a
///   `LocalSet`, so `spawn_local` based schedulers work.
/// - `#[rxnotify_macro::test(paused)]` additionally starts the runtime with
///   tokio time paused.
#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
  let input = parse_macro_input!(item as ItemFn);

  let is_async = input.sig.asyncness.is_some();

  let raw_args = proc_macro2::TokenStream::from(attr);
  let paused = if raw_args.is_empty() {
    false
  } else {
    if !is_async {
      return TokenStream::from(
        syn::Error::new(
          raw_args.span(),
          "rxnotify_macro::test flavor args are only supported for async tests. Use \
           #[rxnotify_macro::test] for sync tests, or make the function async.",
        )
        .to_compile_error(),
      );
    }

    let flavor = if let Ok(ident) = syn::parse2::<Ident>(raw_args.clone()) {
      Some((ident.to_string(), ident.span()))
    } else if let Ok(lit) = syn::parse2::<LitStr>(raw_args.clone()) {
      Some((lit.value(), lit.span()))
    } else {
      None
    };

    match flavor {
      Some((name, _)) if name == "paused" => true,
      Some((_, span)) => {
        return TokenStream::from(
          syn::Error::new(
            span,
            "rxnotify_macro::test only accepts: #[rxnotify_macro::test] or \
             #[rxnotify_macro::test(paused)]",
          )
          .to_compile_error(),
        );
      }
      None => {
        return TokenStream::from(
          syn::Error::new(
            raw_args.span(),
            "rxnotify_macro::test only accepts: #[rxnotify_macro::test] or \
             #[rxnotify_macro::test(paused)]",
          )
          .to_compile_error(),
        );
      }
    }
  };

  if !is_async {
    return TokenStream::from(quote! {
      #[test]
      #input
    });
  }

  let ItemFn { attrs, vis, mut sig, block } = input;
  sig.asyncness = None;
  let start_paused = if paused { quote!(.start_paused(true)) } else { quote!() };

  let expanded = quote! {
    #[test]
    #(#attrs)*
    #vis #sig {
      let runtime = ::tokio::runtime::Builder::new_current_thread()
        .enable_all()
        #start_paused
        .build()
        .expect("failed to build the test runtime");
      let local = ::tokio::task::LocalSet::new();
      local.block_on(&runtime, async move #block)
    }
  };

  TokenStream::from(expanded)
}
